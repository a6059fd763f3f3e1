use std::time::Duration;

use anyhow::Context;
use rotator_core::orchestrator::{RotationOrchestrator, RotationSummary};
use rotator_core::{registry, CommandPaths, Config, StoreConfig};

use crate::output;
use crate::RunArgs;

pub fn run(args: &RunArgs, json: bool) -> anyhow::Result<RotationSummary> {
    let entries = registry::load(&args.config)
        .with_context(|| format!("failed to load registry {}", args.config.display()))?;
    if entries.is_empty() {
        anyhow::bail!(
            "no services in {} — run 'rotator sample' to generate an example registry",
            args.config.display()
        );
    }

    let config = Config {
        store: StoreConfig {
            base_url: args.store_addr.clone(),
            token: args.store_token.clone(),
        },
        lead_time_days: args.lead_time_days,
        max_workers: args.max_workers,
        request_timeout: Duration::from_secs(args.timeout_secs),
        max_retries: args.retries,
        base_delay: Duration::from_millis(args.base_delay_ms),
        dry_run: args.dry_run,
        force: args.force,
        commands: CommandPaths::default(),
    };

    let orchestrator = RotationOrchestrator::new(&config).context("failed to build HTTP client")?;
    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let summary = runtime.block_on(orchestrator.run(entries));

    if json {
        output::print_json(&summary)?;
    } else {
        output::print_summary(&summary, args.dry_run);
    }
    Ok(summary)
}
