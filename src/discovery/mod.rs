//! Service discovery backends.
//!
//! A backend answers one question: which instances carry a given catalog
//! tag. Backends are selected by name at start-up through
//! [`DiscoveryRegistry`]; the built-in `"consul"` backend queries the Consul
//! catalog.

pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::consul::{discover, Catalog, CatalogSnapshot, ConsulClient, ConsulError};

pub use registry::{DiscoveryBuilder, DiscoveryRegistry, RegistryError};

/// Name the Consul backend is registered under.
pub const CONSUL_DISCOVERY: &str = "consul";

/// Capability: resolve a tag to the instances that carry it.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, tag: &str) -> Result<CatalogSnapshot, ConsulError>;

    fn name(&self) -> &str;
}

/// Discovery over any [`Catalog`], Consul by default.
pub struct ConsulDiscovery<C: Catalog + ?Sized = ConsulClient> {
    catalog: Arc<C>,
}

impl<C: Catalog + ?Sized> ConsulDiscovery<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl<C: Catalog + ?Sized + 'static> Discovery for ConsulDiscovery<C> {
    async fn discover(&self, tag: &str) -> Result<CatalogSnapshot, ConsulError> {
        discover(self.catalog.as_ref(), tag).await
    }

    fn name(&self) -> &str {
        CONSUL_DISCOVERY
    }
}

/// Builds [`ConsulDiscovery`] from the `consul` config section.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsulDiscoveryBuilder;

impl DiscoveryBuilder for ConsulDiscoveryBuilder {
    fn name(&self) -> &str {
        CONSUL_DISCOVERY
    }

    fn build(&self, config: &Config) -> Result<Arc<dyn Discovery>, RegistryError> {
        let client = ConsulClient::from_config(&config.consul).map_err(|e| RegistryError::Build {
            name: CONSUL_DISCOVERY.to_string(),
            source: e,
        })?;
        Ok(Arc::new(ConsulDiscovery::new(Arc::new(client))))
    }
}
