//! Sessions and session-bound locks.
//!
//! A session is a lease held by one process. Locks are KV keys bound to a
//! session; Consul releases every lock held under a session when the
//! session is destroyed or its TTL lapses. Callers must not assume a lock
//! outlives its session.
//!
//! Splitting "create session" from "acquire lock" lets one session hold
//! several named locks and lets ownership be kept alive with a single
//! renewal instead of re-acquiring each lock.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ConsulClient, Result};

/// Opaque session handle issued by Consul.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What Consul does with held locks when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Release held locks, keep the keys.
    #[default]
    Release,
    /// Delete the locked keys.
    Delete,
}

/// Session creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Lease TTL. The owner must renew more often than this.
    pub ttl: Option<Duration>,
    pub behavior: SessionBehavior,
    /// Delay before a lock released by session invalidation can be re-acquired.
    pub lock_delay: Option<Duration>,
}

impl SessionOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_lock_delay(mut self, delay: Duration) -> Self {
        self.lock_delay = Some(delay);
        self
    }
}

/// Live session as reported by `/v1/session/info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Node", default)]
    pub node: String,
    #[serde(rename = "TTL", default)]
    pub ttl: String,
    #[serde(rename = "Behavior", default)]
    pub behavior: String,
}

/// Session and lock primitives of the coordination service.
///
/// Every call is independent; the store keeps no local state. Concurrent
/// calls for one session are serialized by the coordination service.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session scoped to `name`.
    async fn create_session_with(&self, name: &str, options: &SessionOptions)
        -> Result<SessionId>;

    /// Create a session with default options.
    async fn create_session(&self, name: &str) -> Result<SessionId> {
        self.create_session_with(name, &SessionOptions::default())
            .await
    }

    /// Extend the session TTL. An expired session yields a status error;
    /// the owner has lost its locks and must create a new session.
    async fn renew_session(&self, session: &SessionId) -> Result<()>;

    /// Look up a live session. `None` when it expired or never existed.
    async fn session_info(&self, session: &SessionId) -> Result<Option<SessionEntry>>;

    /// Try to bind `lock` to `session`. `false` means another live session
    /// holds it; that is contention, not an error.
    async fn acquire_lock(&self, lock: &str, session: &SessionId) -> Result<bool>;

    /// Release `lock` if `session` holds it. Reports whether it was released.
    async fn release_lock(&self, lock: &str, session: &SessionId) -> Result<bool>;

    /// Destroy the session, releasing every lock held under it. Returns
    /// `false` for sessions that no longer exist.
    async fn delete_session(&self, session: &SessionId) -> Result<bool>;
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
    #[serde(rename = "Behavior")]
    behavior: SessionBehavior,
    #[serde(rename = "LockDelay", skip_serializing_if = "Option::is_none")]
    lock_delay: Option<String>,
}

impl<'a> CreateSessionBody<'a> {
    fn new(name: &'a str, options: &SessionOptions) -> Self {
        Self {
            name,
            ttl: options.ttl.map(consul_duration),
            behavior: options.behavior,
            lock_delay: options.lock_delay.map(consul_duration),
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionReply {
    #[serde(rename = "ID")]
    id: String,
}

/// Consul durations are Go duration strings; whole seconds are enough here.
fn consul_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// KV path segments of `lock`; `/` in the name separates key levels.
fn kv_path(lock: &str) -> Vec<&str> {
    ["v1", "kv"].into_iter().chain(lock.split('/')).collect()
}

#[async_trait]
impl SessionStore for ConsulClient {
    async fn create_session_with(
        &self,
        name: &str,
        options: &SessionOptions,
    ) -> Result<SessionId> {
        let body = CreateSessionBody::new(name, options);
        let reply: CreateSessionReply = self
            .put_json(&["v1", "session", "create"], &[], Some(&body))
            .await?;

        info!(name = %name, session = %reply.id, "Created session");
        Ok(SessionId(reply.id))
    }

    async fn renew_session(&self, session: &SessionId) -> Result<()> {
        self.put_empty(&["v1", "session", "renew", session.as_str()])
            .await?;
        debug!(session = %session, "Renewed session");
        Ok(())
    }

    async fn session_info(&self, session: &SessionId) -> Result<Option<SessionEntry>> {
        let entries: Option<Vec<SessionEntry>> = self
            .get_json(&["v1", "session", "info", session.as_str()])
            .await?;
        Ok(entries.and_then(|mut e| e.pop()))
    }

    async fn acquire_lock(&self, lock: &str, session: &SessionId) -> Result<bool> {
        let acquired: bool = self
            .put_json::<(), _>(
                &kv_path(lock),
                &[("acquire", session.as_str())],
                None,
            )
            .await?;
        debug!(lock = %lock, session = %session, acquired, "Lock acquire");
        Ok(acquired)
    }

    async fn release_lock(&self, lock: &str, session: &SessionId) -> Result<bool> {
        let released: bool = self
            .put_json::<(), _>(
                &kv_path(lock),
                &[("release", session.as_str())],
                None,
            )
            .await?;
        debug!(lock = %lock, session = %session, released, "Lock release");
        Ok(released)
    }

    async fn delete_session(&self, session: &SessionId) -> Result<bool> {
        // Consul answers `true` to destroying an unknown session.
        if self.session_info(session).await?.is_none() {
            debug!(session = %session, "Session already gone");
            return Ok(false);
        }

        let destroyed: bool = self
            .put_json::<(), _>(&["v1", "session", "destroy", session.as_str()], &[], None)
            .await?;
        info!(session = %session, destroyed, "Destroyed session");
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::mock::MockConsul;
    use crate::consul::ConsulError;

    #[test]
    fn test_create_body_minimal() {
        let body = CreateSessionBody::new("leader", &SessionOptions::default());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Name": "leader", "Behavior": "release"})
        );
    }

    #[test]
    fn test_create_body_with_ttl_and_delay() {
        let options = SessionOptions::default()
            .with_ttl(Duration::from_secs(15))
            .with_lock_delay(Duration::from_secs(0))
            .with_behavior(SessionBehavior::Delete);
        let json = serde_json::to_value(CreateSessionBody::new("leader", &options)).unwrap();
        assert_eq!(json["TTL"], "15s");
        assert_eq!(json["LockDelay"], "0s");
        assert_eq!(json["Behavior"], "delete");
    }

    #[test]
    fn test_kv_path_splits_levels_and_encodes_names() {
        assert_eq!(kv_path("locks/leader"), vec!["v1", "kv", "locks", "leader"]);

        let client = ConsulClient::new("consul:8500").unwrap();
        let url = client.endpoint(&kv_path("locks/job?id=1#2")).unwrap();
        assert_eq!(url.as_str(), "http://consul:8500/v1/kv/locks/job%3Fid=1%232");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_decode_session_info() {
        let body = r#"[{"ID":"adf4238a-882b-9ddc-4a9d-5b6758e4159e","Name":"leader","Node":"agent-one","LockDelay":15000000000,"Behavior":"release","TTL":"30s"}]"#;
        let entries: Vec<SessionEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(entries[0].name, "leader");
        assert_eq!(entries[0].ttl, "30s");
    }

    #[tokio::test]
    async fn test_create_then_delete_reports_deleted() {
        let consul = MockConsul::new();
        let session = consul.create_session("test").await.unwrap();

        assert!(consul.delete_session(&session).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_not_deleted() {
        let consul = MockConsul::new();
        let random = SessionId::new(uuid::Uuid::new_v4().to_string());

        assert!(!consul.delete_session(&random).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_contention_scenario() {
        let consul = MockConsul::new();
        let a = consul.create_session("a").await.unwrap();
        let b = consul.create_session("b").await.unwrap();

        assert!(consul.acquire_lock("leader", &a).await.unwrap());
        assert!(!consul.acquire_lock("leader", &b).await.unwrap());
        assert!(consul.delete_session(&a).await.unwrap());
        assert!(consul.acquire_lock("leader", &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_lets_other_session_acquire() {
        let consul = MockConsul::new();
        let a = consul.create_session("a").await.unwrap();
        let b = consul.create_session("b").await.unwrap();

        assert!(consul.acquire_lock("leader", &a).await.unwrap());
        assert!(consul.release_lock("leader", &a).await.unwrap());
        assert!(consul.acquire_lock("leader", &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_holder_reports_false() {
        let consul = MockConsul::new();
        let a = consul.create_session("a").await.unwrap();
        let b = consul.create_session("b").await.unwrap();

        assert!(consul.acquire_lock("leader", &a).await.unwrap());
        assert!(!consul.release_lock("leader", &b).await.unwrap());
        assert!(!consul.release_lock("unheld", &a).await.unwrap());
        assert_eq!(consul.lock_holder("leader").await, Some(a));
    }

    #[tokio::test]
    async fn test_renew_expired_session_fails() {
        let consul = MockConsul::new();
        let session = consul.create_session("a").await.unwrap();
        consul.renew_session(&session).await.unwrap();

        consul.expire_session(&session).await;

        let err = consul.renew_session(&session).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(!consul.delete_session(&session).await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_with_unknown_session_is_error() {
        let consul = MockConsul::new();
        let random = SessionId::new("missing");

        let result = consul.acquire_lock("leader", &random).await;
        assert!(matches!(result, Err(ConsulError::Status { code: 500, .. })));
    }

    #[tokio::test]
    async fn test_one_session_holds_many_locks() {
        let consul = MockConsul::new();
        let a = consul.create_session("a").await.unwrap();
        let b = consul.create_session("b").await.unwrap();

        assert!(consul.acquire_lock("route/user-1", &a).await.unwrap());
        assert!(consul.acquire_lock("route/user-2", &a).await.unwrap());
        assert!(consul.delete_session(&a).await.unwrap());

        assert!(consul.acquire_lock("route/user-1", &b).await.unwrap());
        assert!(consul.acquire_lock("route/user-2", &b).await.unwrap());
    }
}
