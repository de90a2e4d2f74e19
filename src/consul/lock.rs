//! Lock handle: one named lock plus the session that may hold it.

use std::sync::Arc;

use tracing::{info, warn};

use super::{ConsulClient, ConsulError, Result, SessionId, SessionOptions, SessionStore};

/// A named lock owned through a session.
///
/// Constructed and passed explicitly by the component that needs exclusive
/// ownership. The handle only tracks the current session ID; lock state
/// lives in the coordination service.
pub struct LockHandle<S: SessionStore + ?Sized = ConsulClient> {
    store: Arc<S>,
    lock_name: String,
    options: SessionOptions,
    session: Option<SessionId>,
}

impl<S: SessionStore + ?Sized> LockHandle<S> {
    pub fn new(store: Arc<S>, lock_name: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            store,
            lock_name: lock_name.into(),
            options,
            session: None,
        }
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Current session, if one is open.
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Open a session named after the lock, unless one is already open.
    pub async fn open(&mut self) -> Result<SessionId> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let session = self
            .store
            .create_session_with(&self.lock_name, &self.options)
            .await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Try to take the lock, opening a session first if needed.
    ///
    /// `Ok(false)` means another session holds the lock.
    pub async fn try_acquire(&mut self) -> Result<bool> {
        let session = self.open().await?;
        let acquired = self.store.acquire_lock(&self.lock_name, &session).await?;
        if acquired {
            info!(lock = %self.lock_name, session = %session, "Lock acquired");
        }
        Ok(acquired)
    }

    /// Keep the session alive.
    ///
    /// If Consul no longer knows the session, the handle forgets it so the
    /// next `try_acquire` starts a fresh one; the error is still returned
    /// because any lock held under the old session is gone.
    pub async fn renew(&mut self) -> Result<()> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| ConsulError::NotFound(format!("no session open for {}", self.lock_name)))?;

        match self.store.renew_session(&session).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.status_code() == Some(404) {
                    warn!(lock = %self.lock_name, session = %session, "Session expired, ownership lost");
                    self.session = None;
                }
                Err(e)
            }
        }
    }

    /// Release the lock, keeping the session open for later re-acquisition.
    pub async fn release(&self) -> Result<bool> {
        match &self.session {
            Some(session) => self.store.release_lock(&self.lock_name, session).await,
            None => Ok(false),
        }
    }

    /// Destroy the session, which releases the lock.
    pub async fn close(&mut self) -> Result<bool> {
        match self.session.take() {
            Some(session) => self.store.delete_session(&session).await,
            None => Ok(false),
        }
    }
}
