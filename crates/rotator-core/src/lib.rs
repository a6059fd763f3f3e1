pub mod config;
pub mod error;
pub mod expiry;
pub mod orchestrator;
pub mod registry;
pub mod reload;
pub mod store;
pub mod transport;

pub use config::{CommandPaths, Config, StoreConfig};
pub use error::{ConfigError, RegistryError, ReloadError, StoreError, TransportError};
pub use orchestrator::{RotationOrchestrator, RotationOutcome, RotationStatus, RotationSummary};
pub use registry::{ReloadMethod, ServiceEntry, ServiceSpec};
