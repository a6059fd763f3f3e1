use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::CommandPaths;
use crate::error::ReloadError;
use crate::registry::{ReloadMethod, ServiceSpec};
use crate::transport::RetryingTransport;

// ---------------------------------------------------------------------------
// ReloadDispatcher
// ---------------------------------------------------------------------------

/// Invokes the reload mechanism a service declared, so a freshly issued
/// certificate actually becomes active.
///
/// Every mechanism is bounded: HTTP reloads inherit the transport's
/// per-request timeout, command invocations run under an explicit
/// `tokio::time::timeout`. A timeout is a failure, never left pending.
#[derive(Debug, Clone)]
pub struct ReloadDispatcher {
    transport: RetryingTransport,
    command_timeout: Duration,
    dry_run: bool,
    commands: CommandPaths,
}

impl ReloadDispatcher {
    pub fn new(
        transport: RetryingTransport,
        command_timeout: Duration,
        dry_run: bool,
        commands: CommandPaths,
    ) -> Self {
        Self {
            transport,
            command_timeout,
            dry_run,
            commands,
        }
    }

    /// Reload one service via its declared method.
    pub async fn dispatch(&self, spec: &ServiceSpec) -> Result<(), ReloadError> {
        if self.dry_run {
            tracing::info!(
                service = %spec.name,
                method = spec.reload.kind(),
                "dry-run: would reload service"
            );
            return Ok(());
        }

        match &spec.reload {
            ReloadMethod::Http { reload_endpoint } => self.reload_via_http(reload_endpoint).await,
            ReloadMethod::ProcessManager { unit } => {
                self.run_command(&self.commands.systemctl, &["reload", unit])
                    .await
            }
            ReloadMethod::ClusterRollout {
                namespace,
                deployment,
            } => {
                let target = format!("deployment/{deployment}");
                self.run_command(
                    &self.commands.kubectl,
                    &["rollout", "restart", &target, "-n", namespace],
                )
                .await
            }
        }
    }

    async fn reload_via_http(&self, endpoint: &str) -> Result<(), ReloadError> {
        let response = self
            .transport
            .execute(self.transport.client().post(endpoint))
            .await?;
        if response.status().is_success() {
            tracing::info!(endpoint, "service reloaded via HTTP");
            Ok(())
        } else {
            Err(ReloadError::Endpoint {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn run_command(&self, program: &str, args: &[&str]) -> Result<(), ReloadError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| ReloadError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: self.command_timeout.as_secs(),
            })?
            .map_err(|source| ReloadError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if output.status.success() {
            tracing::info!(program, ?args, "service reloaded via command");
            Ok(())
        } else {
            Err(ReloadError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
