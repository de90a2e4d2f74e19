//! Consul agent connection settings.

use std::time::Duration;

use serde::Deserialize;

/// Consul agent connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// HTTP address of the agent (scheme optional).
    pub address: String,
    /// Per-request timeout for catalog and session calls.
    pub request_timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ConsulConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
