//! Wire messages for the box routing RPC.
//!
//! Every box exposes the same unary method; the target service and the
//! opaque request body travel inside [`RouteRequest`].

use bytes::Bytes;

/// Fully qualified path of the routing method every box serves.
pub const ROUTING_METHOD: &str = "/brpc.gateway/routing";

/// Request envelope for a routed call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteRequest {
    /// Logical box the call is addressed to.
    #[prost(string, tag = "1")]
    pub box_name: ::prost::alloc::string::String,
    /// Service inside the box.
    #[prost(string, tag = "2")]
    pub service: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "3")]
    pub req_body: Bytes,
}

/// Reply envelope for a routed call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteResponse {
    #[prost(bytes = "bytes", tag = "1")]
    pub res_body: Bytes,
}
