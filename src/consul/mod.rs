//! Consul HTTP API client.
//!
//! Two capabilities are consumed from the coordination service:
//! - [`Catalog`]: service listing and per-service instance detail
//! - [`SessionStore`]: sessions and session-bound KV locks
//!
//! [`ConsulClient`] implements both over HTTP. The in-memory
//! `mock::MockConsul` implements both for tests.

mod catalog;
mod client;
mod keeper;
mod lock;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod session;

pub use catalog::{discover, Catalog, CatalogSnapshot, ServiceInstance};
pub use client::ConsulClient;
pub use keeper::{KeeperState, SessionKeeper};
pub use lock::LockHandle;
pub use session::{SessionBehavior, SessionEntry, SessionId, SessionOptions, SessionStore};

/// Errors from the coordination service.
#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    #[error("Consul request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Consul returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed Consul response: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid Consul address: {0}")]
    InvalidAddress(String),
}

impl ConsulError {
    /// HTTP status code carried by a status error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConsulError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for coordination-service operations.
pub type Result<T> = std::result::Result<T, ConsulError>;
