mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rotator",
    about = "Certificate rotation automation — check expiry, issue new certificates, reload services",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one rotation pass over the service registry
    Run(RunArgs),

    /// Write a sample service registry
    Sample {
        /// Where to write the sample registry
        #[arg(long, default_value = "services.json")]
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Service registry file (.json, .yaml, or .yml)
    #[arg(long, default_value = "services.json")]
    config: PathBuf,

    /// Certificate store base address
    #[arg(long, env = "ROTATOR_STORE_ADDR")]
    store_addr: String,

    /// Certificate store token
    #[arg(long, env = "ROTATOR_STORE_TOKEN", hide_env_values = true)]
    store_token: String,

    /// Rotate when a certificate expires within this many days
    #[arg(
        long,
        env = "ROTATOR_LEAD_TIME_DAYS",
        default_value_t = rotator_core::config::DEFAULT_LEAD_TIME_DAYS
    )]
    lead_time_days: i64,

    /// Maximum concurrent in-flight rotations
    #[arg(
        long,
        env = "ROTATOR_MAX_WORKERS",
        default_value_t = rotator_core::config::DEFAULT_MAX_WORKERS
    )]
    max_workers: usize,

    /// Per-request timeout in seconds (store and reload calls)
    #[arg(
        long,
        env = "ROTATOR_TIMEOUT_SECS",
        default_value_t = rotator_core::config::DEFAULT_TIMEOUT_SECS
    )]
    timeout_secs: u64,

    /// Retries for transient transport failures
    #[arg(long, default_value_t = rotator_core::config::DEFAULT_MAX_RETRIES)]
    retries: u32,

    /// Base backoff delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    /// No side effects: skip issuance and reloads, report what would happen
    #[arg(long)]
    dry_run: bool,

    /// Rotate every service regardless of expiry
    #[arg(long)]
    force: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run(args) => match cmd::run::run(&args, cli.json) {
            Ok(summary) => {
                if summary.has_failures() {
                    std::process::exit(1);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Sample { path } => cmd::sample::run(&path),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
