//! Background session renewal.
//!
//! The session store never schedules renewals. An owner that wants its
//! session kept alive spawns a [`SessionKeeper`] with its own interval,
//! which must be shorter than the session TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{SessionId, SessionStore};

/// Renewal status published by a keeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeeperState {
    /// Renewals are succeeding.
    Alive,
    /// A renewal failed; the session and its locks must be considered gone.
    Lost(String),
    /// The keeper was stopped by its owner.
    Stopped,
}

/// Renews one session on a fixed interval until stopped or lost.
pub struct SessionKeeper {
    session: SessionId,
    state: watch::Receiver<KeeperState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SessionKeeper {
    /// Start renewing `session` every `every`.
    pub fn spawn<S>(store: Arc<S>, session: SessionId, every: Duration) -> Self
    where
        S: SessionStore + ?Sized + 'static,
    {
        let (state_tx, state_rx) = watch::channel(KeeperState::Alive);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let renewing = session.clone();

        // tokio intervals reject a zero period
        let period = every.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            info!(session = %renewing, interval = ?period, "Starting session keeper");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the session was just created.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(session = %renewing, "Session keeper stopped");
                        let _ = state_tx.send(KeeperState::Stopped);
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.renew_session(&renewing).await {
                            warn!(session = %renewing, error = %e, "Session renewal failed, ownership lost");
                            let _ = state_tx.send(KeeperState::Lost(e.to_string()));
                            return;
                        }
                    }
                }
            }
        });

        Self {
            session,
            state: state_rx,
            stop: Some(stop_tx),
            task,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Latest published state.
    pub fn state(&self) -> KeeperState {
        self.state.borrow().clone()
    }

    /// Wait until renewal fails. Returns the failure, or `None` if the
    /// keeper was stopped first.
    pub async fn lost(&mut self) -> Option<String> {
        loop {
            match &*self.state.borrow_and_update() {
                KeeperState::Lost(reason) => return Some(reason.clone()),
                KeeperState::Stopped => return None,
                KeeperState::Alive => {}
            }
            if self.state.changed().await.is_err() {
                return match &*self.state.borrow() {
                    KeeperState::Lost(reason) => Some(reason.clone()),
                    _ => None,
                };
            }
        }
    }

    /// Stop renewing and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for SessionKeeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::mock::MockConsul;

    #[tokio::test(start_paused = true)]
    async fn test_keeper_reports_lost_after_expiry() {
        let consul = Arc::new(MockConsul::new());
        let session = consul.create_session("leader").await.unwrap();
        let mut keeper = SessionKeeper::spawn(consul.clone(), session.clone(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(keeper.state(), KeeperState::Alive);

        consul.expire_session(&session).await;

        let reason = keeper.lost().await.unwrap();
        assert!(reason.contains("404"));
        assert!(matches!(keeper.state(), KeeperState::Lost(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_stop() {
        let consul = Arc::new(MockConsul::new());
        let session = consul.create_session("leader").await.unwrap();
        let keeper = SessionKeeper::spawn(consul.clone(), session.clone(), Duration::from_secs(5));
        let mut state = keeper.state.clone();

        keeper.stop().await;

        assert_eq!(*state.borrow_and_update(), KeeperState::Stopped);
        assert!(consul.session_info(&session).await.unwrap().is_some());
    }
}
