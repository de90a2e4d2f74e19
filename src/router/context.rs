//! Caller deadline carried through a routed call.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline of the caller on whose behalf a call is made.
///
/// Each call phase is bounded by the smaller of its own timeout and the
/// time left before this deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

/// Time granted to one phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Budget {
    pub timeout: Duration,
    /// The caller's deadline, not the phase timeout, is the binding limit.
    pub caller_bound: bool,
}

impl CallContext {
    /// No caller deadline; only phase timeouts apply.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the caller's deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    pub(crate) fn budget(&self, phase_timeout: Duration) -> Budget {
        match self.remaining() {
            Some(remaining) if remaining <= phase_timeout => Budget {
                timeout: remaining,
                caller_bound: true,
            },
            _ => Budget {
                timeout: phase_timeout,
                caller_bound: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_background_uses_phase_timeout() {
        let ctx = CallContext::background();
        let budget = ctx.budget(Duration::from_secs(1));
        assert_eq!(budget.timeout, Duration::from_secs(1));
        assert!(!budget.caller_bound);
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_caller_deadline_caps_phase() {
        let ctx = CallContext::with_timeout(Duration::from_millis(300));
        let budget = ctx.budget(Duration::from_secs(1));
        assert_eq!(budget.timeout, Duration::from_millis(300));
        assert!(budget.caller_bound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_caller_deadline_keeps_phase_timeout() {
        let ctx = CallContext::with_timeout(Duration::from_secs(10));
        let budget = ctx.budget(Duration::from_secs(1));
        assert_eq!(budget.timeout, Duration::from_secs(1));
        assert!(!budget.caller_bound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context() {
        let ctx = CallContext::with_timeout(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert!(ctx.budget(Duration::from_secs(1)).timeout.is_zero());
    }
}
