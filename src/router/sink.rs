//! Where failed calls are reported before the error reaches the caller.

use tracing::error;

use super::{Phase, RouteError};

/// Observability sink for call failures, tagged with the failing phase.
pub trait FailureSink: Send + Sync {
    fn report(&self, phase: Phase, error: &RouteError);
}

/// Logs failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, phase: Phase, err: &RouteError) {
        error!(phase = %phase, error = %err, "Call failed");
    }
}
