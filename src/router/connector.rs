//! Connections to boxes and the connectors that open them.

use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, info_span, Instrument};

use super::RouteError;
use crate::proto::{RouteRequest, RouteResponse};

/// One open connection to a box.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Unary call of `method` carrying `request`.
    async fn invoke(&self, method: &str, request: RouteRequest) -> Result<RouteResponse, Status>;

    /// Address this connection was opened to.
    fn address(&self) -> &str;
}

#[async_trait]
impl Connection for Box<dyn Connection> {
    async fn invoke(&self, method: &str, request: RouteRequest) -> Result<RouteResponse, Status> {
        (**self).invoke(method, request).await
    }

    fn address(&self) -> &str {
        (**self).address()
    }
}

/// Opens connections to an address. Pools hold one connector each.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self, address: &str) -> Result<Self::Conn, RouteError>;
}

/// Connection over a tonic channel.
#[derive(Clone)]
pub struct GrpcConnection {
    address: String,
    channel: Channel,
}

impl GrpcConnection {
    pub fn new(address: impl Into<String>, channel: Channel) -> Self {
        Self {
            address: address.into(),
            channel,
        }
    }
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn invoke(&self, method: &str, request: RouteRequest) -> Result<RouteResponse, Status> {
        let path = PathAndQuery::try_from(method)
            .map_err(|e| Status::invalid_argument(format!("Invalid method path {}: {}", method, e)))?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service was not ready: {}", e)))?;

        let codec: ProstCodec<RouteRequest, RouteResponse> = ProstCodec::default();
        let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
        Ok(response.into_inner())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Runs every invocation of the inner connection inside an `rpc.invoke` span.
pub struct TracedConnection<C> {
    inner: C,
}

impl<C: Connection> TracedConnection<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: Connection> Connection for TracedConnection<C> {
    async fn invoke(&self, method: &str, request: RouteRequest) -> Result<RouteResponse, Status> {
        let span = info_span!("rpc.invoke", method = %method, address = %self.inner.address());
        self.inner.invoke(method, request).instrument(span).await
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

/// Dials `http://{address}` with a lazily connecting tonic endpoint.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector {
    tracing: bool,
    connect_timeout: Option<Duration>,
}

impl GrpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap opened connections in [`TracedConnection`].
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Conn = Box<dyn Connection>;

    async fn connect(&self, address: &str) -> Result<Self::Conn, RouteError> {
        let mut endpoint = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|e| RouteError::Transport(format!("Invalid URI {}: {}", address, e)))?;
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        debug!(address = %address, tracing = self.tracing, "Opening channel");
        let connection = GrpcConnection::new(address, endpoint.connect_lazy());

        if self.tracing {
            Ok(Box::new(TracedConnection::new(connection)))
        } else {
            Ok(Box::new(connection))
        }
    }
}
