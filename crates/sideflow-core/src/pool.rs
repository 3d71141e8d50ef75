//! Warm session cache over the grid.
//!
//! The pool owns one entry per browser slot. Warm-up runs as a background
//! task that publishes sessions into the registry as they come up; request
//! handlers see whatever subset is already Healthy. Lending a handle probes
//! liveness first and transparently replaces dead sessions.
//!
//! The pool does not serialize callers on the same session; that is the lock
//! repository's job.

use crate::error::{CoreError, Result};
use crate::webdriver::{DriverFactory, WebDriver};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Healthy,
    Suspect,
    Dead,
}

pub struct SessionEntry {
    pub session_id: String,
    pub handle: Arc<dyn WebDriver>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
}

pub struct SessionPool {
    factory: Arc<dyn DriverFactory>,
    entries: RwLock<Vec<SessionEntry>>,
    init_timeout: Duration,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn DriverFactory>, init_timeout: Duration) -> Self {
        Self {
            factory,
            entries: RwLock::new(Vec::new()),
            init_timeout,
        }
    }

    /// Run warm-up in a background task so the service entry point never
    /// blocks on it.
    pub fn spawn_warm_up(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.warm_up().await })
    }

    /// Query grid capacity and open up to that many sessions in parallel,
    /// bounded by the startup budget. Sessions are published to the registry
    /// as each one comes up.
    pub async fn warm_up(&self) {
        let deadline = tokio::time::Instant::now() + self.init_timeout;

        // Wait for the grid to come up, within the same budget.
        let status = loop {
            match self.factory.status().await {
                Ok(status) if status.ready => break status,
                Ok(status) => {
                    if tokio::time::Instant::now() >= deadline {
                        break status;
                    }
                    tracing::debug!("grid not ready yet");
                }
                Err(err) => {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::error!(error = %err, "grid unreachable; starting with an empty pool");
                        return;
                    }
                    tracing::debug!(error = %err, "waiting for grid");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        };

        let slots = status.free_slots;
        if slots == 0 {
            tracing::warn!("grid reports no free slots; starting with an empty pool");
            return;
        }
        tracing::info!(slots, "warming session pool");

        let mut creations: FuturesUnordered<_> = (0..slots)
            .map(|_| {
                let factory = Arc::clone(&self.factory);
                async move { factory.new_session().await }
            })
            .collect();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("warm-up budget elapsed before all sessions opened");
                    break;
                }
                next = creations.next() => match next {
                    None => break,
                    Some(Ok(handle)) => self.insert(handle).await,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "session creation failed during warm-up");
                    }
                }
            }
        }

        let count = self.entries.read().await.len();
        tracing::info!(sessions = count, "session pool warm-up complete");
    }

    async fn insert(&self, handle: Arc<dyn WebDriver>) {
        let now = Utc::now();
        let entry = SessionEntry {
            session_id: handle.session_id().to_string(),
            handle,
            state: SessionState::Healthy,
            created_at: now,
            last_checked_at: now,
        };
        tracing::info!(session_id = %entry.session_id, "session joined pool");
        self.entries.write().await.push(entry);
    }

    /// Non-Dead session ids in insertion order.
    pub async fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.state != SessionState::Dead)
            .map(|entry| entry.session_id.clone())
            .collect()
    }

    /// Lend the handle for `session_id`.
    ///
    /// Probes liveness first; a failing probe marks the entry Dead and
    /// replaces it in place, retrying the probe once on the fresh session.
    /// Exclusivity between callers is the lock repository's concern.
    pub async fn acquire(&self, session_id: &str) -> Result<Arc<dyn WebDriver>> {
        let existing = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .find(|entry| entry.session_id == session_id)
                .map(|entry| (Arc::clone(&entry.handle), entry.state))
        };

        let handle = match existing {
            Some((handle, state)) if state != SessionState::Dead => handle,
            _ => return self.replace(session_id).await,
        };

        match handle.current_url().await {
            Ok(_) => {
                self.mark(session_id, SessionState::Healthy).await;
                Ok(handle)
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "liveness probe failed; replacing session");
                self.mark(session_id, SessionState::Suspect).await;
                self.replace(session_id).await
            }
        }
    }

    /// Replace the entry for `session_id` with a freshly opened session.
    ///
    /// The replacement inherits the slot: the new grid id takes the old
    /// entry's position atomically from the view of [`list`](Self::list).
    async fn replace(&self, session_id: &str) -> Result<Arc<dyn WebDriver>> {
        let old_handle = {
            let mut entries = self.entries.write().await;
            match entries
                .iter_mut()
                .find(|entry| entry.session_id == session_id)
            {
                Some(entry) => {
                    entry.state = SessionState::Dead;
                    Some(Arc::clone(&entry.handle))
                }
                None => None,
            }
        };

        if let Some(old) = old_handle {
            if let Err(err) = old.quit().await {
                tracing::warn!(session_id, error = %err, "closing dead session failed");
            }
        }

        let new_handle = match self.factory.new_session().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(session_id, error = %err, "session replacement failed");
                return Err(CoreError::NoSuchSession(session_id.to_string()));
            }
        };

        // One probe on the fresh session; an unusable replacement is fatal
        // for this acquire.
        if let Err(err) = new_handle.current_url().await {
            tracing::error!(session_id, error = %err, "replacement session failed its first probe");
            let _ = new_handle.quit().await;
            return Err(CoreError::NoSuchSession(session_id.to_string()));
        }

        let now = Utc::now();
        let new_entry = SessionEntry {
            session_id: new_handle.session_id().to_string(),
            handle: Arc::clone(&new_handle),
            state: SessionState::Healthy,
            created_at: now,
            last_checked_at: now,
        };
        tracing::info!(
            old = session_id,
            new = %new_entry.session_id,
            "session replaced"
        );

        let mut entries = self.entries.write().await;
        match entries
            .iter()
            .position(|entry| entry.session_id == session_id)
        {
            Some(index) => entries[index] = new_entry,
            None => entries.push(new_entry),
        }

        Ok(new_handle)
    }

    async fn mark(&self, session_id: &str, state: SessionState) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.session_id == session_id)
        {
            entry.state = state;
            entry.last_checked_at = Utc::now();
        }
    }

    /// Close all handles, ignoring per-handle errors, and drain the pool.
    pub async fn shutdown(&self) {
        let drained: Vec<SessionEntry> = {
            let mut entries = self.entries.write().await;
            entries.drain(..).collect()
        };
        tracing::info!(sessions = drained.len(), "shutting down session pool");
        for entry in drained {
            if let Err(err) = entry.handle.quit().await {
                tracing::warn!(session_id = %entry.session_id, error = %err, "session close failed during shutdown");
            }
        }
    }
}
