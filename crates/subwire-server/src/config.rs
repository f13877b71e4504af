//! Server configuration, loaded from TOML.

use crate::error::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub listen: SocketAddr,
    pub connection: ConnectionConfig,
}

/// Settings applied to every connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Interval between `ka` messages after a successful init. Absent or zero
    /// disables keep-alive.
    pub keep_alive_ms: Option<u64>,
    /// Cap on concurrently active subscriptions per connection.
    pub max_subscriptions: Option<usize>,
    /// Frames queued for the socket writer before senders wait.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 4000)),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: None,
            max_subscriptions: None,
            outbound_buffer: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }
}
