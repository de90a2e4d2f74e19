//! Name -> builder registration map for discovery backends.
//!
//! Populated explicitly at start-up. Lookups are case-insensitive and
//! return a typed error for unknown names.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{ConsulDiscoveryBuilder, Discovery};
use crate::config::Config;
use crate::consul::ConsulError;

/// Error types for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Discovery backend not registered: {0}")]
    NotFound(String),

    #[error("Failed to build discovery backend {name}: {source}")]
    Build {
        name: String,
        #[source]
        source: ConsulError,
    },
}

/// Constructs a discovery backend from configuration.
pub trait DiscoveryBuilder: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, config: &Config) -> Result<Arc<dyn Discovery>, RegistryError>;
}

/// Registered discovery builders, keyed by lowercase name.
#[derive(Default)]
pub struct DiscoveryRegistry {
    builders: HashMap<String, Arc<dyn DiscoveryBuilder>>,
}

impl DiscoveryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ConsulDiscoveryBuilder));
        registry
    }

    /// Register a builder, replacing any previous one with the same name.
    pub fn register(&mut self, builder: Arc<dyn DiscoveryBuilder>) {
        let name = builder.name().to_lowercase();
        debug!(name = %name, "Registering discovery backend");
        self.builders.insert(name, builder);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DiscoveryBuilder>, RegistryError> {
        self.builders
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Look up `config.discovery` and build it.
    pub fn build(&self, config: &Config) -> Result<Arc<dyn Discovery>, RegistryError> {
        self.get(&config.discovery)?.build(config)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::CatalogSnapshot;
    use async_trait::async_trait;

    struct FixedDiscovery;

    #[async_trait]
    impl Discovery for FixedDiscovery {
        async fn discover(&self, _tag: &str) -> Result<CatalogSnapshot, ConsulError> {
            Ok(CatalogSnapshot::default())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FixedBuilder;

    impl DiscoveryBuilder for FixedBuilder {
        fn name(&self) -> &str {
            "Fixed"
        }

        fn build(&self, _config: &Config) -> Result<Arc<dyn Discovery>, RegistryError> {
            Ok(Arc::new(FixedDiscovery))
        }
    }

    #[test]
    fn test_defaults_include_consul() {
        let registry = DiscoveryRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["consul"]);
        assert!(registry.get("consul").is_ok());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = DiscoveryRegistry::new();
        registry.register(Arc::new(FixedBuilder));

        assert!(registry.get("fixed").is_ok());
        assert!(registry.get("FIXED").is_ok());
    }

    #[test]
    fn test_unknown_backend_not_found() {
        let registry = DiscoveryRegistry::with_defaults();

        let result = registry.get("zookeeper");
        assert!(matches!(result, Err(RegistryError::NotFound(name)) if name == "zookeeper"));
    }

    #[tokio::test]
    async fn test_build_uses_configured_name() {
        let mut registry = DiscoveryRegistry::with_defaults();
        registry.register(Arc::new(FixedBuilder));
        let mut config = Config::for_test();
        config.discovery = "fixed".to_string();

        let discovery = registry.build(&config).unwrap();
        assert_eq!(discovery.name(), "fixed");
        assert!(discovery.discover("any").await.unwrap().is_empty());
    }
}
