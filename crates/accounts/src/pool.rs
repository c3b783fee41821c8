//! The multi-account pool.
//!
//! Owns every account entry, hands one out per request, and records usage on
//! the way back. All mutation funnels through one mutex; request handlers,
//! the refresh scheduler, and the OAuth callback all share the same `Arc`.
//!
//! Persistence is flat JSON (`accounts.json`), staged and renamed on every
//! commit. Persistence failures are logged, never surfaced to request
//! handlers.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use {
    rand::Rng,
    secrecy::Secret,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use {
    courier_common::{Error, Result, fsio, retry::jitter},
    courier_config::RotationStrategy,
};

use crate::{
    entry::{AccountEntry, AccountStatus, AccountUsage, UsageDelta},
    jwt,
};

/// Locks older than this are assumed to be leaked by a crashed request flow
/// and are released on the next acquire.
const STALE_LOCK: Duration = Duration::from_secs(5 * 60);

const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// What a request handler gets from [`AccountPool::acquire`].
#[derive(Debug, Clone)]
pub struct AcquiredAccount {
    pub entry_id: String,
    pub token: String,
    pub account_id: Option<String>,
}

struct PoolInner {
    entries: Vec<AccountEntry>,
    /// entry id → acquire time.
    locks: HashMap<String, Instant>,
    rr_cursor: usize,
}

pub struct AccountPool {
    path: PathBuf,
    strategy: RotationStrategy,
    /// Base backoff applied on 429 when the upstream sends no retry-after.
    rate_limit_backoff: Duration,
    inner: Mutex<PoolInner>,
    flush_pending: AtomicBool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(buf.as_mut_slice());
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

impl AccountPool {
    /// Load the pool from `accounts.json` under `path`'s directory, migrating
    /// a legacy single-token `auth.json` when present.
    ///
    /// Never fails: an unreadable store logs and yields an empty pool.
    pub fn load(path: impl Into<PathBuf>, strategy: RotationStrategy, backoff: Duration) -> Arc<Self> {
        let path = path.into();
        let mut entries = load_entries(&path);

        if entries.is_empty()
            && let Some(migrated) = migrate_legacy(&path)
        {
            entries = vec![migrated];
        }

        let pool = Arc::new(Self {
            path,
            strategy,
            rate_limit_backoff: backoff,
            inner: Mutex::new(PoolInner {
                entries,
                locks: HashMap::new(),
                rr_cursor: 0,
            }),
            flush_pending: AtomicBool::new(false),
        });
        // Commit any migration result immediately.
        let clone = pool.clone();
        tokio::spawn(async move { clone.persist().await });
        pool
    }

    /// Pick the next usable account and lock it until release.
    ///
    /// Returns `None` when no active, unlocked account exists. Status is
    /// refreshed first: rate-limit windows that have passed promote the entry
    /// back to active, and tokens whose JWT `exp` is behind us demote to
    /// expired.
    pub async fn acquire(&self) -> Option<AcquiredAccount> {
        let mut inner = self.inner.lock().await;
        reap_stale_locks(&mut inner.locks);
        refresh_statuses(&mut inner.entries, now_secs());

        let candidates: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == AccountStatus::Active && !inner.locks.contains_key(&e.id))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let idx = match self.strategy {
            RotationStrategy::LeastUsed => {
                let entries = &inner.entries;
                candidates
                    .into_iter()
                    .min_by_key(|&i| {
                        let e = &entries[i];
                        (
                            e.usage.request_count,
                            e.usage.last_used.unwrap_or(0),
                            e.id.clone(),
                        )
                    })?
            },
            RotationStrategy::RoundRobin => {
                let mut ordered = candidates;
                ordered.sort_by(|&a, &b| inner.entries[a].id.cmp(&inner.entries[b].id));
                let pick = ordered[inner.rr_cursor % ordered.len()];
                inner.rr_cursor = inner.rr_cursor.wrapping_add(1);
                pick
            },
        };

        let entry = &inner.entries[idx];
        let acquired = AcquiredAccount {
            entry_id: entry.id.clone(),
            token: entry.token_str().to_string(),
            account_id: entry.account_id.clone(),
        };
        debug!(entry_id = %acquired.entry_id, "account acquired");
        inner.locks.insert(acquired.entry_id.clone(), Instant::now());
        Some(acquired)
    }

    /// Unlock an entry and record completed-request usage.
    ///
    /// Idempotent: releasing an entry that is not locked is a no-op apart
    /// from the usage record.
    pub async fn release(self: &Arc<Self>, entry_id: &str, usage: Option<UsageDelta>) {
        {
            let mut inner = self.inner.lock().await;
            inner.locks.remove(entry_id);
            if let Some(delta) = usage
                && let Some(entry) = inner.entries.iter_mut().find(|e| e.id == entry_id)
            {
                entry.usage.request_count += 1;
                entry.usage.input_tokens += delta.input_tokens;
                entry.usage.output_tokens += delta.output_tokens;
                entry.usage.last_used = Some(now_secs());
            }
        }
        self.persist_soon();
    }

    /// Unlock the entry, park it for the backoff window, and optionally count
    /// the failed request against its usage.
    pub async fn mark_rate_limited(
        self: &Arc<Self>,
        entry_id: &str,
        retry_after_secs: Option<u64>,
        count_request: bool,
    ) {
        let backoff = retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(self.rate_limit_backoff);
        let until = now_secs() + jitter(backoff, 0.2).as_secs().max(1);
        {
            let mut inner = self.inner.lock().await;
            inner.locks.remove(entry_id);
            if let Some(entry) = inner.entries.iter_mut().find(|e| e.id == entry_id) {
                entry.status = AccountStatus::RateLimited;
                entry.usage.rate_limit_until = Some(until);
                if count_request {
                    entry.usage.request_count += 1;
                    entry.usage.last_used = Some(now_secs());
                }
                info!(entry_id, until, "account rate limited");
            }
        }
        self.persist_soon();
    }

    /// Add an account from a bearer token, deduplicating on the upstream
    /// account id. A second add for the same upstream account updates the
    /// stored tokens instead of growing the pool.
    pub async fn add_account(
        self: &Arc<Self>,
        token: &str,
        refresh_token: Option<&str>,
    ) -> Result<AccountEntry> {
        if token.trim().is_empty() {
            return Err(Error::message("empty token"));
        }
        let claims = jwt::decode(token).unwrap_or_default();

        let entry = {
            let mut inner = self.inner.lock().await;
            let existing = claims.account_id.as_ref().and_then(|aid| {
                inner
                    .entries
                    .iter_mut()
                    .find(|e| e.account_id.as_ref() == Some(aid))
            });

            if let Some(entry) = existing {
                entry.token = Secret::new(token.to_string());
                if let Some(rt) = refresh_token {
                    entry.refresh_token = Some(Secret::new(rt.to_string()));
                }
                if entry.email.is_none() {
                    entry.email = claims.email.clone();
                }
                entry.plan_type = claims.plan_type.clone().or(entry.plan_type.take());
                entry.status = AccountStatus::Active;
                info!(entry_id = %entry.id, "account token updated via dedup");
                entry.clone()
            } else {
                let entry = AccountEntry {
                    id: format!("acct_{}", random_hex(6)),
                    token: Secret::new(token.to_string()),
                    refresh_token: refresh_token.map(|rt| Secret::new(rt.to_string())),
                    email: claims.email,
                    account_id: claims.account_id,
                    plan_type: claims.plan_type,
                    proxy_api_key: format!("ck-{}", random_hex(16)),
                    status: AccountStatus::Active,
                    usage: AccountUsage::default(),
                    added_at: now_secs(),
                };
                info!(entry_id = %entry.id, account_id = ?entry.account_id, "account added");
                inner.entries.push(entry.clone());
                entry
            }
        };

        self.persist().await;
        Ok(entry)
    }

    /// Replace an entry's tokens after a successful OAuth refresh.
    pub async fn update_token(
        self: &Arc<Self>,
        entry_id: &str,
        token: &str,
        rotated_refresh_token: Option<&str>,
    ) -> bool {
        let updated = {
            let mut inner = self.inner.lock().await;
            match inner.entries.iter_mut().find(|e| e.id == entry_id) {
                Some(entry) => {
                    entry.token = Secret::new(token.to_string());
                    if let Some(rt) = rotated_refresh_token {
                        entry.refresh_token = Some(Secret::new(rt.to_string()));
                    }
                    entry.status = AccountStatus::Active;
                    true
                },
                None => false,
            }
        };
        if updated {
            // A fresh token is critical state; commit synchronously.
            self.persist().await;
        }
        updated
    }

    /// Set an entry's status (refresh scheduler bookkeeping).
    pub async fn set_status(self: &Arc<Self>, entry_id: &str, status: AccountStatus) -> bool {
        let changed = {
            let mut inner = self.inner.lock().await;
            match inner.entries.iter_mut().find(|e| e.id == entry_id) {
                Some(entry) => {
                    entry.status = status;
                    true
                },
                None => false,
            }
        };
        if changed {
            self.persist_soon();
        }
        changed
    }

    /// Remove an entry. Idempotent.
    pub async fn remove_account(self: &Arc<Self>, entry_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.locks.remove(entry_id);
            let before = inner.entries.len();
            inner.entries.retain(|e| e.id != entry_id);
            inner.entries.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Zero an entry's usage counters.
    pub async fn reset_usage(self: &Arc<Self>, entry_id: &str) -> bool {
        let reset = {
            let mut inner = self.inner.lock().await;
            match inner.entries.iter_mut().find(|e| e.id == entry_id) {
                Some(entry) => {
                    entry.usage = AccountUsage {
                        window_reset_at: entry.usage.window_reset_at,
                        ..AccountUsage::default()
                    };
                    true
                },
                None => false,
            }
        };
        if reset {
            self.persist().await;
        }
        reset
    }

    /// Align local counters with the upstream's rate-limit window. When the
    /// reset timestamp moves, the old window's counters no longer mean
    /// anything, so they are zeroed.
    pub async fn sync_rate_limit_window(self: &Arc<Self>, entry_id: &str, reset_at: u64) -> bool {
        let changed = {
            let mut inner = self.inner.lock().await;
            match inner.entries.iter_mut().find(|e| e.id == entry_id) {
                Some(entry) if entry.usage.window_reset_at != Some(reset_at) => {
                    entry.usage.request_count = 0;
                    entry.usage.input_tokens = 0;
                    entry.usage.output_tokens = 0;
                    entry.usage.window_reset_at = Some(reset_at);
                    debug!(entry_id, reset_at, "rate-limit window rolled over");
                    true
                },
                _ => false,
            }
        };
        if changed {
            self.persist_soon();
        }
        changed
    }

    /// Snapshot of every entry.
    pub async fn list(&self) -> Vec<AccountEntry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn get(&self, entry_id: &str) -> Option<AccountEntry> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
    }

    /// Whether at least one account is in active status (rate-limit windows
    /// that have passed count as active).
    pub async fn has_active(&self) -> bool {
        let mut inner = self.inner.lock().await;
        refresh_statuses(&mut inner.entries, now_secs());
        inner
            .entries
            .iter()
            .any(|e| e.status == AccountStatus::Active)
    }

    /// Whether `key` matches any account's local proxy key.
    pub async fn has_proxy_key(&self, key: &str) -> bool {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .any(|e| e.proxy_api_key == key)
    }

    /// Count of currently held locks (tests and debug).
    pub async fn locked_count(&self) -> usize {
        self.inner.lock().await.locks.len()
    }

    /// Flush pending state to disk; called from shutdown.
    pub async fn flush(&self) {
        self.persist().await;
    }

    /// Commit the current entry list to disk. Errors are logged only.
    async fn persist(&self) {
        let snapshot = { self.inner.lock().await.entries.clone() };
        if let Err(e) = fsio::persist_json(&self.path, &snapshot).await {
            warn!(error = %e, path = %self.path.display(), "failed to persist accounts");
        }
    }

    /// Debounced persist for non-critical bookkeeping (usage counters).
    fn persist_soon(self: &Arc<Self>) {
        if self.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PERSIST_DEBOUNCE).await;
            pool.flush_pending.store(false, Ordering::SeqCst);
            pool.persist().await;
        });
    }
}

fn reap_stale_locks(locks: &mut HashMap<String, Instant>) {
    let now = Instant::now();
    locks.retain(|id, at| {
        let stale = now.duration_since(*at) >= STALE_LOCK;
        if stale {
            warn!(entry_id = %id, "releasing stale account lock");
        }
        !stale
    });
}

/// Promote rate-limited entries whose window has passed; demote entries whose
/// bearer JWT has expired.
fn refresh_statuses(entries: &mut [AccountEntry], now: u64) {
    for entry in entries {
        if entry.status == AccountStatus::RateLimited
            && entry.usage.rate_limit_until.is_none_or(|until| until <= now)
        {
            entry.status = AccountStatus::Active;
            entry.usage.rate_limit_until = None;
            debug!(entry_id = %entry.id, "rate-limit window passed, account active again");
        }
        if entry.status == AccountStatus::Active && jwt::is_expired(entry.token_str(), now) {
            info!(entry_id = %entry.id, "token expired");
            entry.status = AccountStatus::Expired;
        }
    }
}

fn load_entries(path: &PathBuf) -> Vec<AccountEntry> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed accounts file, starting empty");
                Vec::new()
            },
        },
        Err(_) => Vec::new(),
    }
}

/// One-shot migration of the legacy single-token `auth.json`.
///
/// Accepts both historical shapes: `{"token": ..., "refresh_token": ...}` and
/// the CLI's `{"tokens": {"access_token": ..., "refresh_token": ...}}`. The
/// file is renamed `.bak` once read; failure leaves the pool empty and
/// operational.
fn migrate_legacy(accounts_path: &PathBuf) -> Option<AccountEntry> {
    let legacy = accounts_path.with_file_name("auth.json");
    let raw = std::fs::read_to_string(&legacy).ok()?;

    let parsed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %legacy.display(), error = %e, "legacy auth file unreadable, skipping migration");
            return None;
        },
    };

    let token = parsed["token"]
        .as_str()
        .or_else(|| parsed["tokens"]["access_token"].as_str())?
        .to_string();
    let refresh_token = parsed["refresh_token"]
        .as_str()
        .or_else(|| parsed["tokens"]["refresh_token"].as_str())
        .map(ToString::to_string);

    let claims = jwt::decode(&token).unwrap_or_default();
    let entry = AccountEntry {
        id: format!("acct_{}", random_hex(6)),
        token: Secret::new(token),
        refresh_token: refresh_token.map(Secret::new),
        email: claims.email,
        account_id: claims.account_id,
        plan_type: claims.plan_type,
        proxy_api_key: format!("ck-{}", random_hex(16)),
        status: AccountStatus::Active,
        usage: AccountUsage::default(),
        added_at: now_secs(),
    };

    let backup = legacy.with_extension("json.bak");
    if let Err(e) = std::fs::rename(&legacy, &backup) {
        warn!(error = %e, "failed to rename legacy auth file");
    } else {
        info!(path = %legacy.display(), "migrated legacy auth file");
    }
    Some(entry)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn live_jwt(account_id: &str) -> String {
        crate::jwt::tests::make_jwt(&serde_json::json!({
            "exp": now_secs() + 3600,
            "https://api.openai.com/auth": { "chatgpt_account_id": account_id }
        }))
    }

    fn expired_jwt(account_id: &str) -> String {
        crate::jwt::tests::make_jwt(&serde_json::json!({
            "exp": 1u64,
            "https://api.openai.com/auth": { "chatgpt_account_id": account_id }
        }))
    }

    fn temp_pool(strategy: RotationStrategy) -> (Arc<AccountPool>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = AccountPool::load(
            dir.path().join("accounts.json"),
            strategy,
            Duration::from_secs(60),
        );
        (pool, dir)
    }

    #[tokio::test]
    async fn empty_pool_acquires_nothing() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn add_acquire_release_cycle() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        pool.add_account(&live_jwt("a1"), None).await.unwrap();

        let acquired = pool.acquire().await.unwrap();
        assert_eq!(pool.locked_count().await, 1);

        // Locked: the only entry is unavailable.
        assert!(pool.acquire().await.is_none());

        pool.release(&acquired.entry_id, Some(UsageDelta {
            input_tokens: 5,
            output_tokens: 1,
        }))
        .await;
        assert_eq!(pool.locked_count().await, 0);

        let entry = pool.get(&acquired.entry_id).await.unwrap();
        assert_eq!(entry.usage.request_count, 1);
        assert_eq!(entry.usage.input_tokens, 5);
        assert_eq!(entry.usage.output_tokens, 1);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        pool.add_account(&live_jwt("a1"), None).await.unwrap();
        let acquired = pool.acquire().await.unwrap();
        pool.release(&acquired.entry_id, None).await;
        pool.release(&acquired.entry_id, None).await;
        assert_eq!(pool.locked_count().await, 0);
        // No usage was recorded without a delta.
        assert_eq!(pool.get(&acquired.entry_id).await.unwrap().usage.request_count, 0);
    }

    #[tokio::test]
    async fn dedup_by_account_id() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let first = pool.add_account(&live_jwt("same"), None).await.unwrap();
        let second = pool
            .add_account(&live_jwt("same"), Some("rt-new"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(pool.list().await.len(), 1);
        assert_eq!(second.refresh_token_str(), Some("rt-new"));
    }

    #[tokio::test]
    async fn least_used_prefers_lower_request_count() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        pool.add_account(&live_jwt("a1"), None).await.unwrap();
        pool.add_account(&live_jwt("a2"), None).await.unwrap();

        let first = pool.acquire().await.unwrap();
        pool.release(&first.entry_id, Some(UsageDelta::default())).await;

        // The untouched account must be chosen next.
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.entry_id, second.entry_id);
    }

    #[tokio::test]
    async fn round_robin_rotates_deterministically() {
        let (pool, _dir) = temp_pool(RotationStrategy::RoundRobin);
        pool.add_account(&live_jwt("a1"), None).await.unwrap();
        pool.add_account(&live_jwt("a2"), None).await.unwrap();

        let one = pool.acquire().await.unwrap();
        pool.release(&one.entry_id, None).await;
        let two = pool.acquire().await.unwrap();
        pool.release(&two.entry_id, None).await;
        let three = pool.acquire().await.unwrap();
        pool.release(&three.entry_id, None).await;

        assert_ne!(one.entry_id, two.entry_id);
        assert_eq!(one.entry_id, three.entry_id);
    }

    #[tokio::test]
    async fn rate_limited_entry_sits_out_then_returns() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let entry = pool.add_account(&live_jwt("a1"), None).await.unwrap();

        let acquired = pool.acquire().await.unwrap();
        pool.mark_rate_limited(&acquired.entry_id, Some(30), false).await;

        assert!(pool.acquire().await.is_none());
        let stored = pool.get(&entry.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::RateLimited);
        let until = stored.usage.rate_limit_until.unwrap();
        // ±20% jitter around 30 s.
        assert!(until >= now_secs() + 23 && until <= now_secs() + 37, "{until}");
    }

    #[tokio::test]
    async fn passed_rate_limit_window_promotes_to_active() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let entry = pool.add_account(&live_jwt("a1"), None).await.unwrap();
        {
            let mut inner = pool.inner.lock().await;
            let e = inner.entries.iter_mut().find(|e| e.id == entry.id).unwrap();
            e.status = AccountStatus::RateLimited;
            e.usage.rate_limit_until = Some(now_secs() - 1);
        }
        let acquired = pool.acquire().await;
        assert!(acquired.is_some());
        assert_eq!(pool.get(&entry.id).await.unwrap().usage.rate_limit_until, None);
    }

    #[tokio::test]
    async fn expired_jwt_demotes_entry() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let entry = pool.add_account(&expired_jwt("a1"), None).await.unwrap();
        assert!(pool.acquire().await.is_none());
        assert_eq!(pool.get(&entry.id).await.unwrap().status, AccountStatus::Expired);
    }

    #[tokio::test]
    async fn window_sync_zeroes_counters_once() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let entry = pool.add_account(&live_jwt("a1"), None).await.unwrap();
        let acquired = pool.acquire().await.unwrap();
        pool.release(&acquired.entry_id, Some(UsageDelta {
            input_tokens: 10,
            output_tokens: 2,
        }))
        .await;

        assert!(pool.sync_rate_limit_window(&entry.id, 1_771_902_673).await);
        let stored = pool.get(&entry.id).await.unwrap();
        assert_eq!(stored.usage.request_count, 0);
        assert_eq!(stored.usage.input_tokens, 0);
        assert_eq!(stored.usage.window_reset_at, Some(1_771_902_673));

        // Same timestamp again: no change.
        assert!(!pool.sync_rate_limit_window(&entry.id, 1_771_902_673).await);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        let entry = pool.add_account(&live_jwt("a1"), None).await.unwrap();
        assert!(pool.remove_account(&entry.id).await);
        assert!(!pool.remove_account(&entry.id).await);
        assert!(pool.list().await.is_empty());
    }

    #[tokio::test]
    async fn persistence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let entry_id = {
            let pool = AccountPool::load(&path, RotationStrategy::LeastUsed, Duration::from_secs(60));
            let entry = pool.add_account(&live_jwt("a1"), Some("rt")).await.unwrap();
            entry.id
        };

        let reloaded = AccountPool::load(&path, RotationStrategy::LeastUsed, Duration::from_secs(60));
        let entries = reloaded.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].refresh_token_str(), Some("rt"));
    }

    #[tokio::test]
    async fn legacy_auth_file_is_migrated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(
            dir.path().join("auth.json"),
            serde_json::json!({"tokens": {"access_token": live_jwt("legacy"), "refresh_token": "rt-legacy"}})
                .to_string(),
        )
        .unwrap();

        let pool = AccountPool::load(&path, RotationStrategy::LeastUsed, Duration::from_secs(60));
        let entries = pool.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].account_id.as_deref(), Some("legacy"));
        assert_eq!(entries[0].refresh_token_str(), Some("rt-legacy"));
        assert!(dir.path().join("auth.json.bak").exists());
        assert!(!dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn malformed_legacy_file_leaves_pool_empty_and_working() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(dir.path().join("auth.json"), "{{{{").unwrap();

        let pool = AccountPool::load(&path, RotationStrategy::LeastUsed, Duration::from_secs(60));
        assert!(pool.list().await.is_empty());
        // Pool still accepts accounts.
        pool.add_account(&live_jwt("a1"), None).await.unwrap();
        assert_eq!(pool.list().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let (pool, _dir) = temp_pool(RotationStrategy::LeastUsed);
        assert!(pool.add_account("  ", None).await.is_err());
    }
}
