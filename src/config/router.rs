//! Call router configuration.

use std::time::Duration;

use serde::Deserialize;

/// Call router configuration.
///
/// Each call phase gets its own timeout; the caller's deadline caps all of
/// them, so a slow coordinator cannot eat the whole budget before the
/// real invocation starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Catalog tag identifying coordinator instances.
    pub coordinator_tag: String,
    /// Connections opened when a pool is created.
    pub pool_init_size: usize,
    /// Maximum connections checked out of one pool at a time.
    pub pool_capacity: usize,
    /// Idle connections older than this are discarded instead of reused.
    pub pool_idle_secs: u64,
    /// Wrap connections in a tracing span per invocation.
    pub tracing: bool,
    /// Bound on coordinator address resolution.
    pub resolve_timeout_ms: u64,
    /// Bound on waiting for a pooled connection.
    pub acquire_timeout_ms: u64,
    /// Bound on the remote invocation.
    pub invoke_timeout_ms: u64,
    /// Overall budget used by callers that have no deadline of their own.
    pub call_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            coordinator_tag: "coordinate".to_string(),
            pool_init_size: 8,
            pool_capacity: 32,
            pool_idle_secs: 120,
            tracing: false,
            resolve_timeout_ms: 1000,
            acquire_timeout_ms: 1000,
            invoke_timeout_ms: 1000,
            call_timeout_ms: 3000,
        }
    }
}

impl RouterConfig {
    pub fn pool_idle(&self) -> Duration {
        Duration::from_secs(self.pool_idle_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.coordinator_tag, "coordinate");
        assert_eq!(config.pool_init_size, 8);
        assert_eq!(config.pool_capacity, 32);
        assert_eq!(config.pool_idle(), Duration::from_secs(120));
        assert!(!config.tracing);
        assert_eq!(config.resolve_timeout(), Duration::from_secs(1));
        assert_eq!(config.acquire_timeout(), Duration::from_secs(1));
        assert_eq!(config.invoke_timeout(), Duration::from_secs(1));
    }
}
