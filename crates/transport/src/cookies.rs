//! Per-account cookie jar.
//!
//! The upstream's anti-bot layer hands out `cf_clearance` / `__cf_bm` and
//! expects them back; losing one across a restart means re-running the
//! challenge, so those two persist synchronously. Everything else coalesces
//! into a debounced write.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use courier_common::fsio;

/// Cookies whose loss forces a new anti-bot challenge.
const CRITICAL_COOKIES: &[&str] = &["cf_clearance", "__cf_bm"];

const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

const STORE_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub value: String,
    /// Unix seconds; `None` = session cookie, kept until overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

/// One parsed `Set-Cookie` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<u64>,
    /// `Max-Age=0` (or an Expires in the past) removes the cookie.
    pub delete: bool,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    #[serde(rename = "_version")]
    version: u32,
    accounts: HashMap<String, HashMap<String, Cookie>>,
}

pub struct CookieJar {
    path: PathBuf,
    /// account → cookies in insertion order.
    inner: Mutex<HashMap<String, Vec<(String, Cookie)>>>,
    flush_pending: AtomicBool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl CookieJar {
    /// Load `cookies.json`, accepting both the current versioned layout and
    /// the legacy v1 flat maps of name → value string.
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let accounts = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_store(&raw),
            Err(_) => HashMap::new(),
        };
        Arc::new(Self {
            path,
            inner: Mutex::new(accounts),
            flush_pending: AtomicBool::new(false),
        })
    }

    /// Capture every `Set-Cookie` line from one response. A critical cookie
    /// change persists before this returns; other changes debounce.
    pub async fn capture(self: &Arc<Self>, account: &str, set_cookie_lines: &[String]) {
        if set_cookie_lines.is_empty() {
            return;
        }
        let now = now_secs();
        let mut touched_critical = false;
        let mut changed = false;
        {
            let mut inner = self.inner.lock().await;
            let cookies = inner.entry(account.to_string()).or_default();
            for line in set_cookie_lines {
                let Some(parsed) = parse_set_cookie(line, now) else {
                    continue;
                };
                if CRITICAL_COOKIES.contains(&parsed.name.as_str()) {
                    touched_critical = true;
                }
                changed = true;
                if parsed.delete {
                    cookies.retain(|(name, _)| *name != parsed.name);
                    continue;
                }
                let cookie = Cookie {
                    value: parsed.value,
                    expires: parsed.expires,
                };
                match cookies.iter_mut().find(|(name, _)| *name == parsed.name) {
                    Some((_, existing)) => *existing = cookie,
                    None => cookies.push((parsed.name, cookie)),
                }
            }
        }
        if !changed {
            return;
        }
        debug!(account, critical = touched_critical, "cookies captured");
        if touched_critical {
            self.persist().await;
        } else {
            self.persist_soon();
        }
    }

    /// `Cookie` header value for one account: unexpired cookies in insertion
    /// order, or `None` when the account has none.
    pub async fn cookie_header(&self, account: &str) -> Option<String> {
        let now = now_secs();
        let inner = self.inner.lock().await;
        let cookies = inner.get(account)?;
        let header = cookies
            .iter()
            .filter(|(_, c)| c.expires.is_none_or(|exp| exp > now))
            .map(|(name, c)| format!("{name}={}", c.value))
            .collect::<Vec<_>>()
            .join("; ");
        (!header.is_empty()).then_some(header)
    }

    /// Snapshot of one account's cookies (management endpoints).
    pub async fn list(&self, account: &str) -> Vec<(String, Cookie)> {
        self.inner
            .lock()
            .await
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Upsert one cookie by hand (management endpoints). Always persists
    /// synchronously: a manual edit should survive an immediate restart.
    pub async fn set(self: &Arc<Self>, account: &str, name: &str, value: &str, expires: Option<u64>) {
        {
            let mut inner = self.inner.lock().await;
            let cookies = inner.entry(account.to_string()).or_default();
            let cookie = Cookie {
                value: value.to_string(),
                expires,
            };
            match cookies.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = cookie,
                None => cookies.push((name.to_string(), cookie)),
            }
        }
        self.persist().await;
    }

    /// Drop all cookies for one account.
    pub async fn clear(self: &Arc<Self>, account: &str) -> bool {
        let removed = self.inner.lock().await.remove(account).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Flush pending state; called on shutdown.
    pub async fn flush(&self) {
        self.persist().await;
    }

    async fn persist(&self) {
        let file = {
            let inner = self.inner.lock().await;
            StoreFile {
                version: STORE_VERSION,
                accounts: inner
                    .iter()
                    .map(|(account, cookies)| {
                        (
                            account.clone(),
                            cookies.iter().cloned().collect::<HashMap<_, _>>(),
                        )
                    })
                    .collect(),
            }
        };
        if let Err(e) = fsio::persist_json(&self.path, &file).await {
            warn!(error = %e, path = %self.path.display(), "failed to persist cookies");
        }
    }

    fn persist_soon(self: &Arc<Self>) {
        if self.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let jar = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PERSIST_DEBOUNCE).await;
            jar.flush_pending.store(false, Ordering::SeqCst);
            jar.persist().await;
        });
    }
}

fn parse_store(raw: &str) -> HashMap<String, Vec<(String, Cookie)>> {
    // Current layout.
    if let Ok(file) = serde_json::from_str::<StoreFile>(raw) {
        return file
            .accounts
            .into_iter()
            .map(|(account, cookies)| {
                let mut ordered: Vec<(String, Cookie)> = cookies.into_iter().collect();
                ordered.sort_by(|(a, _), (b, _)| a.cmp(b));
                (account, ordered)
            })
            .collect();
    }

    // v1: flat maps of name → value string, no expiry metadata.
    match serde_json::from_str::<HashMap<String, HashMap<String, String>>>(raw) {
        Ok(v1) => v1
            .into_iter()
            .map(|(account, cookies)| {
                let mut ordered: Vec<(String, Cookie)> = cookies
                    .into_iter()
                    .map(|(name, value)| {
                        (name, Cookie {
                            value,
                            expires: None,
                        })
                    })
                    .collect();
                ordered.sort_by(|(a, _), (b, _)| a.cmp(b));
                (account, ordered)
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "malformed cookie store, starting empty");
            HashMap::new()
        },
    }
}

/// Parse one raw `Set-Cookie` line, attributes intact. `Max-Age` is
/// preferred over `Expires` for computing the absolute expiry.
pub fn parse_set_cookie(line: &str, now: u64) -> Option<ParsedSetCookie> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut max_age: Option<i64> = None;
    let mut expires_at: Option<u64> = None;
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr, ""),
        };
        if key.eq_ignore_ascii_case("max-age") {
            max_age = val.parse().ok();
        } else if key.eq_ignore_ascii_case("expires") {
            expires_at = parse_http_date(val);
        }
    }

    let (expires, delete) = match max_age {
        Some(age) if age <= 0 => (None, true),
        Some(age) => (Some(now + age as u64), false),
        None => match expires_at {
            Some(at) if at <= now => (None, true),
            other => (other, false),
        },
    };

    Some(ParsedSetCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        expires,
        delete,
    })
}

/// `Expires` attribute (`Wed, 21 Oct 2026 07:28:00 GMT`) to unix seconds.
fn parse_http_date(value: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp().max(0) as u64)
}
