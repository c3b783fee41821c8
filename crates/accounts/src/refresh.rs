//! Proactive token refresh.
//!
//! One timer per account, firing a configurable margin before the JWT
//! expires. The scheduler borrows the pool; it owns no account state and
//! only talks to it through the pool's update API.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use courier_oauth::OAuthFlow;

use crate::{
    entry::AccountStatus,
    jwt,
    pool::AccountPool,
};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct RefreshScheduler {
    pool: Arc<AccountPool>,
    flow: Arc<OAuthFlow>,
    margin: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RefreshScheduler {
    pub fn new(pool: Arc<AccountPool>, flow: Arc<OAuthFlow>, margin: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            flow,
            margin,
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Schedule a refresh timer for every refreshable entry.
    pub async fn schedule_all(self: &Arc<Self>) {
        for entry in self.pool.list().await {
            if matches!(
                entry.status,
                AccountStatus::Active | AccountStatus::Refreshing
            ) {
                self.schedule(&entry.id).await;
            }
        }
    }

    /// (Re)schedule the timer for one entry at `exp − margin`. Entries
    /// without a refresh token or a parseable expiry are skipped.
    ///
    /// Returns a boxed future: `schedule` and `run_refresh`/`try_refresh`
    /// call each other indirectly through the spawned timer task, and that
    /// cycle makes the compiler unable to prove the plain `async fn` opaque
    /// type is `Send`. Boxing breaks the cycle without changing behavior.
    pub fn schedule<'a>(
        self: &'a Arc<Self>,
        entry_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Some(entry) = self.pool.get(entry_id).await else {
                return;
            };
            if entry.refresh_token_str().is_none() {
                debug!(entry_id, "no refresh token, skipping refresh timer");
                return;
            }
            let Some(exp) = jwt::decode(entry.token_str()).and_then(|c| c.exp) else {
                debug!(entry_id, "token has no expiry, skipping refresh timer");
                return;
            };

            let fire_at = exp.saturating_sub(self.margin.as_secs());
            let delay = Duration::from_secs(fire_at.saturating_sub(now_secs()));

            let scheduler = self.clone();
            let id = entry_id.to_string();
            let handle = tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                scheduler.run_refresh(&id).await;
            });

            if let Some(previous) = self
                .timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(entry_id.to_string(), handle)
            {
                previous.abort();
            }
            debug!(entry_id, delay_secs = delay.as_secs(), "refresh scheduled");
        })
    }

    /// Cancel the timer for one entry (account removed).
    pub fn cancel(&self, entry_id: &str) {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(entry_id)
        {
            handle.abort();
        }
    }

    /// Abort every timer. Called on shutdown.
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    async fn run_refresh(self: &Arc<Self>, entry_id: &str) {
        let Some(entry) = self.pool.get(entry_id).await else {
            return;
        };
        let Some(refresh_token) = entry.refresh_token_str().map(ToString::to_string) else {
            return;
        };

        self.pool
            .set_status(entry_id, AccountStatus::Refreshing)
            .await;

        match self.try_refresh(entry_id, &refresh_token).await {
            Ok(()) => {},
            Err(first) => {
                warn!(entry_id, error = %first, "token refresh failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                if let Err(second) = self.try_refresh(entry_id, &refresh_token).await {
                    warn!(entry_id, error = %second, "token refresh failed twice, marking expired");
                    self.pool.set_status(entry_id, AccountStatus::Expired).await;
                }
            },
        }
    }

    async fn try_refresh(
        self: &Arc<Self>,
        entry_id: &str,
        refresh_token: &str,
    ) -> courier_oauth::Result<()> {
        let tokens = self.flow.refresh(refresh_token).await?;
        self.pool
            .update_token(
                entry_id,
                tokens.access_token_str(),
                tokens.refresh_token_str(),
            )
            .await;
        info!(entry_id, "token refreshed");
        self.schedule(entry_id).await;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use courier_config::RotationStrategy;
    use courier_oauth::OAuthConfig;

    fn jwt_expiring_at(exp: u64, account_id: &str) -> String {
        crate::jwt::tests::make_jwt(&serde_json::json!({
            "exp": exp,
            "https://api.openai.com/auth": { "chatgpt_account_id": account_id }
        }))
    }

    async fn start_token_mock(response: serde_json::Value) -> String {
        use axum::routing::post;
        let app = axum::Router::new().route(
            "/token",
            post(move || {
                let response = response.clone();
                async move { axum::Json(response) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn flow_for(base: &str) -> Arc<OAuthFlow> {
        Arc::new(OAuthFlow::new(OAuthConfig {
            client_id: "app_test".into(),
            auth_url: String::new(),
            token_url: format!("{base}/token"),
            redirect_uri: String::new(),
            scopes: vec![],
            device_auth_url: None,
        }))
    }

    #[tokio::test]
    async fn near_expiry_token_refreshes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let pool = AccountPool::load(
            dir.path().join("accounts.json"),
            RotationStrategy::LeastUsed,
            Duration::from_secs(60),
        );
        // Expires within the margin, so the timer fires straight away.
        let old_token = jwt_expiring_at(now_secs() + 10, "a1");
        let entry = pool.add_account(&old_token, Some("rt-old")).await.unwrap();

        let fresh_token = jwt_expiring_at(now_secs() + 3600, "a1");
        let base = start_token_mock(serde_json::json!({
            "access_token": fresh_token,
            "refresh_token": "rt-rotated"
        }))
        .await;

        let scheduler =
            RefreshScheduler::new(pool.clone(), flow_for(&base), Duration::from_secs(300));
        scheduler.schedule(&entry.id).await;

        // Let the immediate refresh complete.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let updated = pool.get(&entry.id).await.unwrap();
        assert_eq!(updated.status, AccountStatus::Active);
        assert_eq!(updated.token_str(), fresh_token);
        assert_eq!(updated.refresh_token_str(), Some("rt-rotated"));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn entries_without_refresh_token_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pool = AccountPool::load(
            dir.path().join("accounts.json"),
            RotationStrategy::LeastUsed,
            Duration::from_secs(60),
        );
        let token = jwt_expiring_at(now_secs() + 10, "a1");
        let entry = pool.add_account(&token, None).await.unwrap();

        let scheduler = RefreshScheduler::new(
            pool.clone(),
            flow_for("http://127.0.0.1:1"),
            Duration::from_secs(300),
        );
        scheduler.schedule(&entry.id).await;
        assert!(scheduler.timers.lock().unwrap().is_empty());
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn shutdown_aborts_timers() {
        let dir = tempfile::tempdir().unwrap();
        let pool = AccountPool::load(
            dir.path().join("accounts.json"),
            RotationStrategy::LeastUsed,
            Duration::from_secs(60),
        );
        let token = jwt_expiring_at(now_secs() + 100_000, "a1");
        let entry = pool.add_account(&token, Some("rt")).await.unwrap();

        let scheduler = RefreshScheduler::new(
            pool.clone(),
            flow_for("http://127.0.0.1:1"),
            Duration::from_secs(300),
        );
        scheduler.schedule(&entry.id).await;
        assert_eq!(scheduler.timers.lock().unwrap().len(), 1);
        scheduler.shutdown();
        assert!(scheduler.timers.lock().unwrap().is_empty());
    }
}
