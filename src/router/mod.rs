//! Call router.
//!
//! Resolves `(box, service, routing key)` to a box address, either from the
//! sticky-route cache or by asking the coordinator, then invokes the
//! routing method on a pooled connection to that address.
//!
//! Every call runs four phases in order: resolve, pool, acquire, invoke.
//! Each suspension point gets its own timeout, capped by the caller's
//! deadline. A failure in any phase is reported to the [`FailureSink`] with
//! that phase and returned as a [`CallError`]. There are no retries.

pub mod connector;
pub mod context;
pub mod link;
pub mod pool;
pub mod sink;


use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::consul::{CatalogSnapshot, ConsulError};
use crate::discovery::Discovery;
use crate::proto::{RouteRequest, ROUTING_METHOD};

pub use connector::{Connection, Connector, GrpcConnection, GrpcConnector, TracedConnection};
pub use context::CallContext;
pub use link::{LinkCache, LinkError, MemoryLinkCache};
pub use pool::{Pool, PoolRegistry, PoolSettings, PooledConnection};
pub use sink::{FailureSink, TracingSink};

/// Box name the coordinator answers to.
pub const COORDINATOR_BOX: &str = "coordinate";

/// Coordinator service that maps a box to an address.
pub const FIND_SERVICE: &str = "find";

/// Phase of a routed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Resolve,
    Pool,
    Acquire,
    Invoke,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Pool => "pool",
            Phase::Acquire => "acquire",
            Phase::Invoke => "invoke",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for routing operations.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Link cache error: {0}")]
    Link(#[from] LinkError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] ConsulError),
}

/// A failed call, tagged with the phase that failed.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct CallError {
    pub phase: Phase,
    #[source]
    pub source: RouteError,
}

#[derive(Serialize)]
struct FindRequest<'a> {
    #[serde(rename = "Box")]
    box_name: &'a str,
    #[serde(rename = "Service")]
    service: &'a str,
}

#[derive(Deserialize)]
struct FindReply {
    #[serde(rename = "Address", alias = "address", default)]
    address: String,
}

#[derive(Debug, Clone, Copy)]
struct PhaseTimeouts {
    resolve: Duration,
    acquire: Duration,
    invoke: Duration,
}

impl From<&RouterConfig> for PhaseTimeouts {
    fn from(config: &RouterConfig) -> Self {
        Self {
            resolve: config.resolve_timeout(),
            acquire: config.acquire_timeout(),
            invoke: config.invoke_timeout(),
        }
    }
}

/// Run `fut` within the phase budget derived from `ctx`.
///
/// Expiry of the caller's deadline is `DeadlineExceeded`; expiry of the
/// phase's own timeout is whatever `on_timeout` yields.
async fn bounded<T, F>(
    ctx: &CallContext,
    phase_timeout: Duration,
    on_timeout: impl FnOnce() -> RouteError,
    fut: F,
) -> Result<T, RouteError>
where
    F: Future<Output = Result<T, RouteError>>,
{
    let budget = ctx.budget(phase_timeout);
    if budget.caller_bound && budget.timeout.is_zero() {
        return Err(RouteError::DeadlineExceeded);
    }

    match tokio::time::timeout(budget.timeout, fut).await {
        Ok(result) => result,
        Err(_) if budget.caller_bound => Err(RouteError::DeadlineExceeded),
        Err(_) => Err(on_timeout()),
    }
}

/// Pick one coordinator instance uniformly at random.
fn select_coordinator(snapshot: &CatalogSnapshot) -> Option<String> {
    let mut candidates: Vec<_> = snapshot.instances().collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| a.service_id.cmp(&b.service_id));
    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates[index].endpoint())
}

/// Routes calls to boxes.
pub struct Router<C: Connector = GrpcConnector> {
    coordinator: String,
    timeouts: PhaseTimeouts,
    pool_settings: PoolSettings,
    connector: Arc<C>,
    links: Arc<dyn LinkCache>,
    pools: PoolRegistry<Pool<C>>,
    sink: Arc<dyn FailureSink>,
}

impl Router<GrpcConnector> {
    /// Discover coordinators tagged `config.coordinator_tag` and route
    /// through a randomly chosen one over gRPC.
    pub async fn from_config(
        config: &RouterConfig,
        discovery: &dyn Discovery,
    ) -> Result<Self, RouteError> {
        let snapshot = discovery.discover(&config.coordinator_tag).await?;
        let coordinator = select_coordinator(&snapshot).ok_or_else(|| {
            RouteError::NotFound(format!(
                "no instance tagged {} in {} discovery",
                config.coordinator_tag,
                discovery.name()
            ))
        })?;

        info!(
            coordinator = %coordinator,
            tag = %config.coordinator_tag,
            candidates = snapshot.len(),
            "Selected coordinator"
        );

        let connector = GrpcConnector::new()
            .with_tracing(config.tracing)
            .with_connect_timeout(config.acquire_timeout());
        Ok(Router::builder(coordinator, connector).config(config).build())
    }
}

impl<C: Connector> Router<C> {
    pub fn builder(coordinator: impl Into<String>, connector: C) -> RouterBuilder<C> {
        RouterBuilder {
            coordinator: coordinator.into(),
            connector,
            config: RouterConfig::default(),
            links: None,
            sink: None,
        }
    }

    /// Coordinator address, fixed at construction.
    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }

    /// Number of per-address pools built so far.
    pub async fn pool_count(&self) -> usize {
        self.pools.len().await
    }

    /// Call `service_name` in `box_name` with `body` and return the reply body.
    ///
    /// A non-empty `routing_key` pins the box address: the first call asks
    /// the coordinator and records the answer, later calls with the same
    /// key reuse it. An empty key asks the coordinator every time.
    pub async fn call(
        &self,
        ctx: &CallContext,
        box_name: &str,
        service_name: &str,
        routing_key: &str,
        body: Bytes,
    ) -> Result<Bytes, CallError> {
        if ctx.is_expired() {
            return Err(self.fail(Phase::Resolve, RouteError::DeadlineExceeded));
        }

        let address = self
            .find_box(ctx, box_name, service_name, routing_key)
            .await
            .map_err(|e| self.fail(Phase::Resolve, e))?;

        let pool = self
            .pool(ctx, &address)
            .await
            .map_err(|e| self.fail(Phase::Pool, e))?;

        let mut conn = self
            .checkout(ctx, &pool)
            .await
            .map_err(|e| self.fail(Phase::Acquire, e))?;

        let request = RouteRequest {
            box_name: box_name.to_string(),
            service: service_name.to_string(),
            req_body: body,
        };
        let result = bounded(ctx, self.timeouts.invoke, || RouteError::DeadlineExceeded, async {
            conn.invoke(ROUTING_METHOD, request)
                .await
                .map_err(RouteError::from)
        })
        .await;

        match result {
            Ok(response) => Ok(response.res_body),
            Err(e) => {
                conn.mark_unhealthy();
                Err(self.fail(Phase::Invoke, e))
            }
        }
    }

    /// Resolve the box address for a call.
    async fn find_box(
        &self,
        ctx: &CallContext,
        box_name: &str,
        service_name: &str,
        routing_key: &str,
    ) -> Result<String, RouteError> {
        if routing_key.is_empty() {
            return self.coordinator_lookup(ctx, box_name, service_name).await;
        }

        if let Some(address) = self.links.target(routing_key).await? {
            debug!(key = %routing_key, address = %address, "Sticky route hit");
            return Ok(address);
        }

        let address = self.coordinator_lookup(ctx, box_name, service_name).await?;
        if let Err(e) = self.links.link(routing_key, &address).await {
            warn!(key = %routing_key, address = %address, error = %e, "Failed to record sticky route");
        }
        Ok(address)
    }

    /// Ask the coordinator which address serves `box_name`.
    async fn coordinator_lookup(
        &self,
        ctx: &CallContext,
        box_name: &str,
        service_name: &str,
    ) -> Result<String, RouteError> {
        let pool = self.pool(ctx, &self.coordinator).await?;
        let mut conn = self.checkout(ctx, &pool).await?;

        let body = serde_json::to_vec(&FindRequest {
            box_name,
            service: service_name,
        })
        .map_err(|e| RouteError::Decode(e.to_string()))?;
        let request = RouteRequest {
            box_name: COORDINATOR_BOX.to_string(),
            service: FIND_SERVICE.to_string(),
            req_body: body.into(),
        };

        let result = bounded(ctx, self.timeouts.resolve, || RouteError::DeadlineExceeded, async {
            conn.invoke(ROUTING_METHOD, request)
                .await
                .map_err(RouteError::from)
        })
        .await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                conn.mark_unhealthy();
                return Err(e);
            }
        };
        drop(conn);

        let reply: FindReply = serde_json::from_slice(&response.res_body)
            .map_err(|e| RouteError::Decode(format!("coordinator reply: {}", e)))?;
        if reply.address.is_empty() {
            return Err(RouteError::NotFound(format!(
                "no address for box {} service {}",
                box_name, service_name
            )));
        }

        debug!(box_name = %box_name, address = %reply.address, "Coordinator resolved box");
        Ok(reply.address)
    }

    /// Pool for `address`, created on first use.
    ///
    /// Building a pool is limited only by the caller's deadline; its prefill
    /// connects are already bounded by the connect timeout. Callers that wait
    /// on another caller's build are capped the same way.
    async fn pool(&self, ctx: &CallContext, address: &str) -> Result<Arc<Pool<C>>, RouteError> {
        let build = self.pools.get_or_try_create(address, || {
            let connector = Arc::clone(&self.connector);
            let settings = self.pool_settings.clone();
            async move {
                info!(
                    address = %address,
                    init_size = settings.init_size,
                    capacity = settings.capacity,
                    "Creating connection pool"
                );
                Pool::open(address, connector, settings).await
            }
        });
        bounded(ctx, Duration::MAX, || RouteError::DeadlineExceeded, build).await
    }

    async fn checkout(
        &self,
        ctx: &CallContext,
        pool: &Pool<C>,
    ) -> Result<PooledConnection<C>, RouteError> {
        bounded(
            ctx,
            self.timeouts.acquire,
            || RouteError::PoolExhausted(pool.address().to_string()),
            pool.get(),
        )
        .await
    }

    fn fail(&self, phase: Phase, source: RouteError) -> CallError {
        self.sink.report(phase, &source);
        CallError { phase, source }
    }
}

/// Explicit wiring for a [`Router`].
pub struct RouterBuilder<C: Connector> {
    coordinator: String,
    connector: C,
    config: RouterConfig,
    links: Option<Arc<dyn LinkCache>>,
    sink: Option<Arc<dyn FailureSink>>,
}

impl<C: Connector> RouterBuilder<C> {
    /// Timeouts and pool sizing.
    pub fn config(mut self, config: &RouterConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Sticky-route cache. Defaults to [`MemoryLinkCache`].
    pub fn link_cache(mut self, links: Arc<dyn LinkCache>) -> Self {
        self.links = Some(links);
        self
    }

    /// Failure sink. Defaults to [`TracingSink`].
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Router<C> {
        Router {
            coordinator: self.coordinator,
            timeouts: PhaseTimeouts::from(&self.config),
            pool_settings: PoolSettings::from(&self.config),
            connector: Arc::new(self.connector),
            links: self
                .links
                .unwrap_or_else(|| Arc::new(MemoryLinkCache::new())),
            pools: PoolRegistry::new(),
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        }
    }
}
