//! Sticky-route cache: pins a routing key to a resolved address.
//!
//! The router reads the cache before asking the coordinator and writes to
//! it after a coordinator-resolved miss. It never evicts; eviction belongs
//! to the cache implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Error types for sticky-route cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link cache unavailable: {0}")]
    Unavailable(String),
}

/// Routing key -> address cache.
#[async_trait]
pub trait LinkCache: Send + Sync {
    /// Address bound to `key`, if any.
    async fn target(&self, key: &str) -> Result<Option<String>, LinkError>;

    /// Bind `key` to `address`.
    async fn link(&self, key: &str, address: &str) -> Result<(), LinkError>;
}

/// In-process link cache.
#[derive(Debug, Default)]
pub struct MemoryLinkCache {
    links: RwLock<HashMap<String, String>>,
}

impl MemoryLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the binding for `key`.
    pub async fn unlink(&self, key: &str) -> Option<String> {
        self.links.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LinkCache for MemoryLinkCache {
    async fn target(&self, key: &str) -> Result<Option<String>, LinkError> {
        Ok(self.links.read().await.get(key).cloned())
    }

    async fn link(&self, key: &str, address: &str) -> Result<(), LinkError> {
        self.links
            .write()
            .await
            .insert(key.to_string(), address.to_string());
        Ok(())
    }
}
