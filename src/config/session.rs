//! Session lease policy.
//!
//! The session manager never schedules renewals itself. These values are
//! read by the process that owns the session and passed in explicitly.

use std::time::Duration;

use serde::Deserialize;

use crate::consul::{SessionBehavior, SessionOptions};

/// Session lease policy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// TTL requested from Consul. None = no TTL (session bound to node health only).
    pub ttl_secs: Option<u64>,
    /// How often the owner renews. Must be shorter than the TTL.
    pub renew_interval_secs: Option<u64>,
    /// What Consul does with held locks when the session ends.
    pub behavior: SessionBehavior,
    /// Lock delay applied by Consul after an involuntary release.
    pub lock_delay_secs: Option<u64>,
}

impl SessionConfig {
    /// Session creation options derived from this policy.
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            ttl: self.ttl_secs.map(Duration::from_secs),
            behavior: self.behavior,
            lock_delay: self.lock_delay_secs.map(Duration::from_secs),
        }
    }

    /// Renewal cadence, if the owner should keep the session alive.
    pub fn renew_interval(&self) -> Option<Duration> {
        self.renew_interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default_has_no_ttl() {
        let config = SessionConfig::default();
        let options = config.options();
        assert!(options.ttl.is_none());
        assert!(options.lock_delay.is_none());
        assert_eq!(options.behavior, SessionBehavior::Release);
        assert!(config.renew_interval().is_none());
    }

    #[test]
    fn test_session_config_options() {
        let config = SessionConfig {
            ttl_secs: Some(15),
            renew_interval_secs: Some(5),
            behavior: SessionBehavior::Delete,
            lock_delay_secs: Some(0),
        };
        let options = config.options();
        assert_eq!(options.ttl, Some(Duration::from_secs(15)));
        assert_eq!(options.behavior, SessionBehavior::Delete);
        assert_eq!(options.lock_delay, Some(Duration::ZERO));
        assert_eq!(config.renew_interval(), Some(Duration::from_secs(5)));
    }
}
