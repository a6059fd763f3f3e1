use thiserror::Error;

/// Network-level failures. Fully absorbed by the transport's retry policy;
/// surfaces upward only after retries are exhausted.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cannot be retried: body is not clonable")]
    UnclonableRequest,

    #[error("invalid request: {0}")]
    InvalidRequest(#[source] reqwest::Error),

    #[error("connection failed after {attempts} attempts: {source}")]
    ConnectionExhausted {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("retriable status {status} persisted after {attempts} attempts")]
    StatusExhausted { status: u16, attempts: u32 },
}

/// The certificate store responded, but with an error or a payload we could
/// not decode. Not retried beyond what the transport already did.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store returned status {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("failed to decode store response for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A reload mechanism reported failure or timed out.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reload endpoint {endpoint} returned status {status}")]
    Endpoint { endpoint: String, status: u16 },

    #[error("{program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A service entry that cannot be acted on: unrecognized reload method or
/// malformed parameters. Converted to a `Failed` outcome, never to success.
#[derive(Debug, Clone, Error)]
#[error("invalid service entry '{name}': {detail}")]
pub struct ConfigError {
    pub name: String,
    pub detail: String,
}

/// File-level registry problems. These abort before a pass starts; everything
/// entry-level is downgraded to [`ConfigError`] instead.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry file not found: {0}")]
    NotFound(String),

    #[error("unsupported registry format '{0}': expected .json, .yaml, or .yml")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
