//! Ephemeral store for in-flight login attempts, keyed by the OAuth `state`.
//!
//! Each entry is single-use: a callback consumes it. Entries expire after
//! five minutes and a background sweep clears abandoned attempts.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;

const PENDING_TTL: Duration = Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One in-flight login attempt.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub code_verifier: String,
    pub redirect_uri: String,
    /// Host the browser should be returned to after the exchange, for logins
    /// relayed from a remote machine.
    pub return_host: Option<String>,
    /// Where the attempt came from (`web`, `cli`, `device`).
    pub source: String,
    pub created_at: Instant,
}

#[derive(Default)]
pub struct PendingAuthStore {
    inner: Mutex<HashMap<String, PendingAuth>>,
}

impl PendingAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: String, pending: PendingAuth) {
        self.lock().insert(state, pending);
    }

    /// Validate and consume a state token. Returns the pending attempt when
    /// the state was present and not expired.
    pub fn take(&self, state: &str) -> Option<PendingAuth> {
        let pending = self.lock().remove(state)?;
        (pending.created_at.elapsed() < PENDING_TTL).then_some(pending)
    }

    /// Remove expired entries.
    pub fn sweep(&self) {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, p| p.created_at.elapsed() < PENDING_TTL);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "swept expired login attempts");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Spawn the periodic sweeper. The task runs until aborted.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                store.sweep();
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingAuth>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
