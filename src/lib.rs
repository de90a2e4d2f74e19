//! Boxroute - dispatch core for box-based microservices.
//!
//! Resolves a logical box/service pair to a live address, routes the call
//! through a pooled gRPC connection, and exposes Consul session locks for
//! claiming exclusive ownership of named resources.

pub mod config;
pub mod consul;
pub mod discovery;
pub mod proto;
pub mod router;
pub mod utils;
