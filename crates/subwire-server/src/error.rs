//! Error types.

use crate::executor::ExecutionError;
use crate::registry::RegistryError;
use std::path::PathBuf;

/// Fault that escapes message handling. The connection is closed when one
/// reaches the serve loop.
///
/// Outbound messages hold only strings and JSON values, so encoding does not
/// fail today; this is the boundary for faults that would.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of a single inbound message. The Display text is what the client
/// receives as the `error` payload.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid payload type")]
    InvalidType,
    #[error("start message requires an id")]
    MissingId,
    #[error("subscription limit of {0} reached")]
    TooManySubscriptions(usize),
    #[error("invalid start payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Not reported to the client; escalated to the serve loop instead.
    #[error(transparent)]
    Fault(#[from] ConnectionError),
}

/// Error loading a [`ServerConfig`](crate::ServerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Error running the WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
