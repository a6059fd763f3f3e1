use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Where the certificate store lives and how to authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base address, e.g. `https://vault.company.internal`.
    pub base_url: String,
    /// Opaque token sent as the `X-Vault-Token` header.
    pub token: String,
}

// ---------------------------------------------------------------------------
// CommandPaths
// ---------------------------------------------------------------------------

/// Programs invoked by the reload dispatcher. Overridable so packaging and
/// tests can substitute a shim binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPaths {
    #[serde(default = "default_systemctl")]
    pub systemctl: String,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

impl Default for CommandPaths {
    fn default() -> Self {
        Self {
            systemctl: default_systemctl(),
            kubectl: default_kubectl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

/// Explicit configuration for one rotation pass. Constructed once by the
/// caller (CLI flags / environment) and passed into the core — the core
/// itself never reads the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    /// Rotate when the certificate expires within this many days.
    pub lead_time_days: i64,
    /// Ceiling on concurrent in-flight rotations.
    pub max_workers: usize,
    /// Per-request timeout for store and reload calls.
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient transport failures.
    pub max_retries: u32,
    /// Backoff before retry k is `base_delay * 2^(k-1)`.
    pub base_delay: Duration,
    /// Route all side-effecting calls through no-op paths.
    pub dry_run: bool,
    /// Rotate every service regardless of expiry.
    pub force: bool,
    pub commands: CommandPaths,
}

pub const DEFAULT_LEAD_TIME_DAYS: i64 = 30;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Config {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            lead_time_days: DEFAULT_LEAD_TIME_DAYS,
            max_workers: DEFAULT_MAX_WORKERS,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            dry_run: false,
            force: false,
            commands: CommandPaths::default(),
        }
    }
}
