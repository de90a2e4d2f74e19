//! In-memory coordination service for testing.
//!
//! Mirrors the Consul semantics the crate relies on: tag listing, instance
//! detail, sessions with lock ownership, and release-on-destroy.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Catalog, ConsulError, Result, ServiceInstance, SessionEntry, SessionId, SessionOptions,
    SessionStore,
};

#[derive(Debug, Clone)]
struct MockSession {
    name: String,
    options: SessionOptions,
}

/// Mock Consul that keeps catalog and sessions in memory.
#[derive(Default)]
pub struct MockConsul {
    services: RwLock<HashMap<String, Vec<String>>>,
    instances: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    failing_services: RwLock<HashSet<String>>,
    fail_on_list: RwLock<bool>,
    queried: RwLock<Vec<String>>,
    sessions: RwLock<HashMap<SessionId, MockSession>>,
    /// lock name -> holding session
    locks: RwLock<HashMap<String, SessionId>>,
}

impl MockConsul {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service with its tags and instances.
    pub async fn register_service(
        &self,
        name: &str,
        tags: &[&str],
        instances: Vec<ServiceInstance>,
    ) {
        self.services.write().await.insert(
            name.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self.instances
            .write()
            .await
            .insert(name.to_string(), instances);
    }

    /// Make instance lookups for `service` fail with HTTP 500.
    pub async fn fail_instances_for(&self, service: &str) {
        self.failing_services
            .write()
            .await
            .insert(service.to_string());
    }

    pub async fn set_fail_on_list(&self, fail: bool) {
        *self.fail_on_list.write().await = fail;
    }

    /// Services whose instance detail was requested, sorted.
    pub async fn queried_services(&self) -> Vec<String> {
        let mut queried = self.queried.read().await.clone();
        queried.sort();
        queried
    }

    /// Simulate TTL expiry: drop the session and release its locks.
    pub async fn expire_session(&self, session: &SessionId) {
        self.sessions.write().await.remove(session);
        self.locks.write().await.retain(|_, holder| holder != session);
    }

    pub async fn lock_holder(&self, lock: &str) -> Option<SessionId> {
        self.locks.read().await.get(lock).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Options the session was created with.
    pub async fn session_options(&self, session: &SessionId) -> Option<SessionOptions> {
        self.sessions
            .read()
            .await
            .get(session)
            .map(|s| s.options.clone())
    }

    fn internal(message: &str) -> ConsulError {
        ConsulError::Status {
            code: 500,
            body: message.to_string(),
        }
    }
}

#[async_trait]
impl Catalog for MockConsul {
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>> {
        if *self.fail_on_list.read().await {
            return Err(Self::internal("catalog unavailable"));
        }
        Ok(self.services.read().await.clone())
    }

    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        self.queried.write().await.push(service.to_string());
        if self.failing_services.read().await.contains(service) {
            return Err(Self::internal("instance lookup failed"));
        }
        Ok(self
            .instances
            .read()
            .await
            .get(service)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for MockConsul {
    async fn create_session_with(
        &self,
        name: &str,
        options: &SessionOptions,
    ) -> Result<SessionId> {
        let id = SessionId::new(Uuid::new_v4().to_string());
        self.sessions.write().await.insert(
            id.clone(),
            MockSession {
                name: name.to_string(),
                options: options.clone(),
            },
        );
        Ok(id)
    }

    async fn renew_session(&self, session: &SessionId) -> Result<()> {
        if self.sessions.read().await.contains_key(session) {
            Ok(())
        } else {
            Err(ConsulError::Status {
                code: 404,
                body: format!("Session id '{}' not found", session),
            })
        }
    }

    async fn session_info(&self, session: &SessionId) -> Result<Option<SessionEntry>> {
        Ok(self.sessions.read().await.get(session).map(|s| SessionEntry {
            id: session.to_string(),
            name: s.name.clone(),
            node: "mock".to_string(),
            ttl: s
                .options
                .ttl
                .map(|t| format!("{}s", t.as_secs()))
                .unwrap_or_default(),
            behavior: format!("{:?}", s.options.behavior).to_lowercase(),
        }))
    }

    async fn acquire_lock(&self, lock: &str, session: &SessionId) -> Result<bool> {
        if !self.sessions.read().await.contains_key(session) {
            return Err(Self::internal("invalid session"));
        }
        let mut locks = self.locks.write().await;
        match locks.get(lock) {
            Some(holder) => Ok(holder == session),
            None => {
                locks.insert(lock.to_string(), session.clone());
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, lock: &str, session: &SessionId) -> Result<bool> {
        let mut locks = self.locks.write().await;
        if locks.get(lock) == Some(session) {
            locks.remove(lock);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_session(&self, session: &SessionId) -> Result<bool> {
        if self.sessions.write().await.remove(session).is_none() {
            return Ok(false);
        }
        self.locks.write().await.retain(|_, holder| holder != session);
        Ok(true)
    }
}
