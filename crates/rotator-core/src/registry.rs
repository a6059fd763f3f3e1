use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RegistryError};

// ---------------------------------------------------------------------------
// ReloadMethod
// ---------------------------------------------------------------------------

/// How a service picks up its new certificate. Closed set: dispatch is
/// exhaustive, and an unrecognized method is rejected at the registry
/// boundary rather than discovered mid-rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reload_method", rename_all = "snake_case")]
pub enum ReloadMethod {
    /// POST to an in-service reload endpoint.
    Http { reload_endpoint: String },
    /// `systemctl reload <unit>` on the local process manager.
    ProcessManager { unit: String },
    /// `kubectl rollout restart` scoped to a namespaced deployment.
    ClusterRollout { namespace: String, deployment: String },
}

impl ReloadMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            ReloadMethod::Http { .. } => "http",
            ReloadMethod::ProcessManager { .. } => "process_manager",
            ReloadMethod::ClusterRollout { .. } => "cluster_rollout",
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceSpec
// ---------------------------------------------------------------------------

/// Immutable description of one rotatable service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique key within a pass.
    pub name: String,
    /// Store locator, e.g. `pki/issue/payments`.
    pub cert_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(flatten)]
    pub reload: ReloadMethod,
}

impl ServiceSpec {
    /// The common name for issuance; falls back to the service name.
    pub fn common_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// ServiceEntry
// ---------------------------------------------------------------------------

/// One registry entry as handed to the orchestrator. Malformed entries are
/// carried as `Rejected` so they surface as per-service failed outcomes
/// instead of aborting the whole file.
#[derive(Debug, Clone)]
pub enum ServiceEntry {
    Ready(ServiceSpec),
    Rejected(ConfigError),
}

impl ServiceEntry {
    pub fn name(&self) -> &str {
        match self {
            ServiceEntry::Ready(spec) => &spec.name,
            ServiceEntry::Rejected(err) => &err.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a service registry from a JSON or YAML file, dispatched on the
/// extension. Entry-level problems become [`ServiceEntry::Rejected`];
/// file-level problems (missing file, bad format) are errors.
pub fn load(path: &Path) -> Result<Vec<ServiceEntry>, RegistryError> {
    if !path.exists() {
        return Err(RegistryError::NotFound(path.display().to_string()));
    }
    let data = std::fs::read_to_string(path)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let raw: Vec<serde_yaml::Value> = match ext {
        "json" => serde_json::from_str(&data)?,
        "yaml" | "yml" => serde_yaml::from_str(&data)?,
        other => return Err(RegistryError::UnsupportedFormat(other.to_string())),
    };

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, value)| entry_from_value(i, value))
        .collect())
}

fn entry_from_value(index: usize, value: serde_yaml::Value) -> ServiceEntry {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("entry #{}", index + 1));

    match serde_yaml::from_value::<ServiceSpec>(value) {
        Ok(spec) => ServiceEntry::Ready(spec),
        Err(e) => ServiceEntry::Rejected(ConfigError {
            name,
            detail: e.to_string(),
        }),
    }
}

/// The sample registry written by `rotator sample`, one service per reload
/// method.
pub fn sample() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: "payments-api".into(),
            cert_path: "pki/issue/payments".into(),
            common_name: Some("payments.company.com".into()),
            reload: ReloadMethod::Http {
                reload_endpoint: "http://payments.internal/reload".into(),
            },
        },
        ServiceSpec {
            name: "orders-api".into(),
            cert_path: "pki/issue/orders".into(),
            common_name: Some("orders.company.com".into()),
            reload: ReloadMethod::ClusterRollout {
                namespace: "production".into(),
                deployment: "orders-api".into(),
            },
        },
        ServiceSpec {
            name: "auth-service".into(),
            cert_path: "pki/issue/auth".into(),
            common_name: Some("auth.company.com".into()),
            reload: ReloadMethod::ProcessManager {
                unit: "auth-service".into(),
            },
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
