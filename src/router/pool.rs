//! Per-address connection pools and the registry that owns them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{self, Metrics, Object, PoolError, RecycleError, RecycleResult, TimeoutType};
use deadpool::Runtime;
use tokio::sync::{OnceCell, RwLock};
use tonic::Status;
use tracing::{debug, warn};

use super::connector::{Connection, Connector};
use super::RouteError;
use crate::config::RouterConfig;
use crate::proto::{RouteRequest, RouteResponse};

/// Sizing and idle policy for one pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Connections opened up front.
    pub init_size: usize,
    /// Maximum connections checked out at once.
    pub capacity: usize,
    /// Connections unused for this long are closed instead of reused.
    pub idle_timeout: Duration,
    /// Longest wait for free capacity.
    pub wait_timeout: Duration,
    /// Longest wait for a single connect.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for PoolSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            init_size: config.pool_init_size,
            capacity: config.pool_capacity,
            idle_timeout: config.pool_idle(),
            wait_timeout: config.acquire_timeout(),
            connect_timeout: config.acquire_timeout(),
        }
    }
}

/// Opens and vets connections to one address on behalf of the pool.
pub struct ConnectionManager<C: Connector> {
    address: String,
    connector: Arc<C>,
    idle_timeout: Duration,
}

impl<C: Connector> managed::Manager for ConnectionManager<C> {
    type Type = C::Conn;
    type Error = RouteError;

    async fn create(&self) -> Result<C::Conn, RouteError> {
        self.connector.connect(&self.address).await
    }

    async fn recycle(&self, _conn: &mut C::Conn, metrics: &Metrics) -> RecycleResult<RouteError> {
        if metrics.last_used() >= self.idle_timeout {
            debug!(address = %self.address, "Closing idle connection");
            return Err(RecycleError::Message("Idle timeout expired".into()));
        }
        Ok(())
    }
}

/// Bounded pool of connections to one address.
pub struct Pool<C: Connector> {
    address: String,
    inner: managed::Pool<ConnectionManager<C>>,
}

impl<C: Connector> Pool<C> {
    /// Create the pool and open up to `init_size` connections.
    ///
    /// Prefill connects run concurrently under the connect timeout. A
    /// connect that fails or times out leaves its slot to be filled on
    /// demand; it does not fail the pool.
    pub async fn open(
        address: impl Into<String>,
        connector: Arc<C>,
        settings: PoolSettings,
    ) -> Result<Self, RouteError> {
        let address = address.into();
        let capacity = settings.capacity.max(1);

        let manager = ConnectionManager {
            address: address.clone(),
            connector,
            idle_timeout: settings.idle_timeout,
        };
        let inner = managed::Pool::builder(manager)
            .max_size(capacity)
            .wait_timeout(Some(settings.wait_timeout))
            .create_timeout(Some(settings.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RouteError::Transport(format!("Failed to create pool: {}", e)))?;

        let pool = Self { address, inner };
        pool.prefill(settings.init_size.min(capacity)).await;
        Ok(pool)
    }

    async fn prefill(&self, count: usize) {
        // Held together so each checkout opens its own connection.
        let results = futures::future::join_all((0..count).map(|_| self.inner.get())).await;
        let opened = results.iter().filter(|r| r.is_ok()).count();
        if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
            warn!(
                address = %self.address,
                opened,
                wanted = count,
                error = %e,
                "Connection pool prefill incomplete"
            );
        }
        debug!(
            address = %self.address,
            prefill = opened,
            capacity = self.inner.status().max_size,
            "Connection pool opened"
        );
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check out a connection, waiting up to the wait timeout for capacity.
    ///
    /// Idle connections are reused unless they sat past the idle timeout. A
    /// new connection is opened only when none is idle.
    pub async fn get(&self) -> Result<PooledConnection<C>, RouteError> {
        let conn = self.inner.get().await.map_err(|e| self.checkout_error(e))?;
        Ok(PooledConnection {
            conn: Some(conn),
            healthy: true,
        })
    }

    fn checkout_error(&self, error: PoolError<RouteError>) -> RouteError {
        match error {
            PoolError::Timeout(TimeoutType::Wait) => RouteError::PoolExhausted(self.address.clone()),
            PoolError::Timeout(_) => {
                RouteError::Transport(format!("Timed out connecting to {}", self.address))
            }
            PoolError::Backend(e) => e,
            other => RouteError::Transport(other.to_string()),
        }
    }

    /// Connections waiting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.status().available
    }

    /// Checkouts still possible before callers start waiting.
    pub fn available(&self) -> usize {
        let status = self.inner.status();
        let in_use = status.size.saturating_sub(status.available);
        status.max_size.saturating_sub(in_use)
    }
}

/// A checked-out connection.
///
/// Dropping it returns the connection to its pool, unless it was marked
/// unhealthy, in which case the connection is closed. Capacity is released
/// either way.
pub struct PooledConnection<C: Connector> {
    conn: Option<Object<ConnectionManager<C>>>,
    healthy: bool,
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> PooledConnection<C> {
    pub async fn invoke(
        &self,
        method: &str,
        request: RouteRequest,
    ) -> Result<RouteResponse, Status> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Status::internal("Connection already released"))?;
        conn.invoke(method, request).await
    }

    /// Discard the connection instead of recycling it.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.healthy {
            return;
        }
        if let Some(conn) = self.conn.take() {
            let conn = Object::take(conn);
            debug!(address = %conn.address(), "Discarding unhealthy connection");
        }
    }
}

/// Address -> pool map. Each pool is built at most once.
pub struct PoolRegistry<P> {
    pools: RwLock<HashMap<String, Arc<OnceCell<Arc<P>>>>>,
}

impl<P> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }
}

impl<P> PoolRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool for `address`, building it with `create` if absent.
    ///
    /// Concurrent first users all wait on the same cell, so `create` runs
    /// once. A failed build leaves the slot empty for the next caller.
    pub async fn get_or_try_create<F, Fut, E>(&self, address: &str, create: F) -> Result<Arc<P>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, E>>,
    {
        let existing = self.pools.read().await.get(address).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => Arc::clone(
                self.pools
                    .write()
                    .await
                    .entry(address.to_string())
                    .or_default(),
            ),
        };

        cell.get_or_try_init(|| async { create().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Already-built pool for `address`.
    pub async fn get(&self, address: &str) -> Option<Arc<P>> {
        let cell = self.pools.read().await.get(address).cloned()?;
        cell.get().cloned()
    }

    /// Number of built pools.
    pub async fn len(&self) -> usize {
        self.pools
            .read()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
