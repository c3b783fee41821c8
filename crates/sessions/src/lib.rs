//! Multi-turn session cache.
//!
//! The upstream keeps hidden reasoning state per response id. To thread a
//! client's next turn onto that state, the cache maps a hash of the
//! conversation prefix (everything except the newest message) to the last
//! upstream response id seen for that prefix. A hit sets
//! `previous_response_id` on the next upstream request; the upstream does the
//! rest.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use {
    sha2::{Digest, Sha256},
    tracing::debug,
};

/// One cached exchange.
#[derive(Debug, Clone)]
pub struct Session {
    pub task_id: String,
    pub response_id: String,
    pub message_hash: String,
    pub created_at: Instant,
}

struct CacheInner {
    /// message hash → session.
    by_hash: HashMap<String, Session>,
    /// Insertion order for capacity eviction.
    order: Vec<String>,
}

pub struct SessionCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl SessionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                by_hash: HashMap::new(),
                order: Vec::new(),
            }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Truncated SHA-256 over the canonical JSON of the conversation prefix:
    /// every message except the newest, serialized as `role\n:content` pairs.
    pub fn prefix_hash(messages: &[(String, String)]) -> Option<String> {
        if messages.len() < 2 {
            return None;
        }
        let prefix = &messages[..messages.len() - 1];
        let canonical = serde_json::to_string(&prefix).ok()?;
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Some(hex[..16].to_string())
    }

    /// Look up the response id for a conversation prefix. Expired entries
    /// are treated as misses.
    pub fn get(&self, message_hash: &str) -> Option<String> {
        let inner = self.lock();
        let session = inner.by_hash.get(message_hash)?;
        (session.created_at.elapsed() < self.ttl).then(|| session.response_id.clone())
    }

    /// Store the upstream response id for a prefix under a fresh task id.
    /// A later store for the same prefix replaces the earlier one (most
    /// recent response wins). Overflow evicts the oldest insertion.
    pub fn store(&self, message_hash: &str, response_id: &str) -> Session {
        let session = Session {
            task_id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            response_id: response_id.to_string(),
            message_hash: message_hash.to_string(),
            created_at: Instant::now(),
        };

        let mut inner = self.lock();
        if inner
            .by_hash
            .insert(message_hash.to_string(), session.clone())
            .is_none()
        {
            inner.order.push(message_hash.to_string());
        }

        while inner.order.len() > self.max_entries {
            let oldest = inner.order.remove(0);
            inner.by_hash.remove(&oldest);
            debug!(hash = %oldest, "session evicted on overflow");
        }
        session
    }

    /// Drop entries older than the TTL. Called on the cleanup interval.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut inner = self.lock();
        let before = inner.by_hash.len();
        inner.by_hash.retain(|_, s| s.created_at.elapsed() < ttl);
        let by_hash = &inner.by_hash;
        let retained: Vec<String> = inner
            .order
            .iter()
            .filter(|h| by_hash.contains_key(*h))
            .cloned()
            .collect();
        inner.order = retained;
        let removed = before - inner.by_hash.len();
        if removed > 0 {
            debug!(removed, "session cache swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_hash.is_empty()
    }

    /// Spawn the periodic sweeper. Runs until aborted.
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                cache.sweep();
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(turns: &[(&str, &str)]) -> Vec<(String, String)> {
        turns
            .iter()
            .map(|(r, c)| ((*r).to_string(), (*c).to_string()))
            .collect()
    }

    #[test]
    fn single_message_has_no_prefix() {
        assert!(SessionCache::prefix_hash(&msgs(&[("user", "hi")])).is_none());
    }

    #[test]
    fn hash_covers_all_but_last() {
        // Same prefix, different newest message → same hash.
        let a = SessionCache::prefix_hash(&msgs(&[
            ("user", "hi"),
            ("assistant", "hello"),
            ("user", "next"),
        ]))
        .unwrap();
        let b = SessionCache::prefix_hash(&msgs(&[
            ("user", "hi"),
            ("assistant", "hello"),
            ("user", "different"),
        ]))
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        // Different prefix → different hash.
        let c = SessionCache::prefix_hash(&msgs(&[
            ("user", "hi!"),
            ("assistant", "hello"),
            ("user", "next"),
        ]))
        .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn store_then_get() {
        let cache = SessionCache::new(Duration::from_secs(60), 10);
        let session = cache.store("abcd", "resp_1");
        assert!(session.task_id.starts_with("task_"));
        assert_eq!(cache.get("abcd").as_deref(), Some("resp_1"));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn newest_store_wins_for_same_prefix() {
        let cache = SessionCache::new(Duration::from_secs(60), 10);
        cache.store("h", "resp_old");
        cache.store("h", "resp_new");
        assert_eq!(cache.get("h").as_deref(), Some("resp_new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn overflow_evicts_oldest_insertion() {
        let cache = SessionCache::new(Duration::from_secs(60), 2);
        cache.store("h1", "r1");
        cache.store("h2", "r2");
        cache.store("h3", "r3");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("h1"), None);
        assert_eq!(cache.get("h2").as_deref(), Some("r2"));
        assert_eq!(cache.get("h3").as_deref(), Some("r3"));
    }

    #[test]
    fn expired_entries_miss_and_sweep() {
        let cache = SessionCache::new(Duration::ZERO, 10);
        cache.store("h", "r");
        assert_eq!(cache.get("h"), None);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }
}
