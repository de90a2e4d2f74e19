//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod consul;
mod router;
mod session;

pub use consul::ConsulConfig;
pub use router::RouterConfig;
pub use session::SessionConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BOXROUTE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BOXROUTE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BOXROUTE_LOG";
/// Discovery backend used when none is configured.
pub const DEFAULT_DISCOVERY: &str = "consul";

use serde::Deserialize;

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery backend name, resolved through the discovery registry.
    pub discovery: String,
    /// Consul agent connection.
    pub consul: ConsulConfig,
    /// Call router tuning.
    pub router: RouterConfig,
    /// Session lease policy handed to lock owners.
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: DEFAULT_DISCOVERY.to_string(),
            consul: ConsulConfig::default(),
            router: RouterConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.discovery, "consul");
        assert_eq!(config.consul.address, "http://127.0.0.1:8500");
        assert_eq!(config.router.coordinator_tag, "coordinate");
        assert!(config.session.ttl_secs.is_none());
    }

    #[test]
    #[serial]
    fn test_load_without_sources_uses_defaults() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let config = Config::load(None).unwrap();
        assert_eq!(config.router.pool_capacity, 32);
        assert_eq!(config.router.pool_init_size, 8);
    }

    #[test]
    #[serial]
    fn test_load_env_overrides() {
        std::env::remove_var(CONFIG_ENV_VAR);
        std::env::set_var("BOXROUTE__ROUTER__POOL_CAPACITY", "4");
        std::env::set_var("BOXROUTE__CONSUL__ADDRESS", "http://consul:8500");

        let config = Config::load(None);

        std::env::remove_var("BOXROUTE__ROUTER__POOL_CAPACITY");
        std::env::remove_var("BOXROUTE__CONSUL__ADDRESS");

        let config = config.unwrap();
        assert_eq!(config.router.pool_capacity, 4);
        assert_eq!(config.consul.address, "http://consul:8500");
        assert_eq!(config.router.pool_init_size, 8);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let result = Config::load(Some("/nonexistent/boxroute.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
