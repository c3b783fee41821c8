//! Account entry model.

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Lifecycle state of a pooled account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Expired,
    RateLimited,
    Refreshing,
    Disabled,
}

/// Per-account usage bookkeeping.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountUsage {
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Unix seconds of the last completed request.
    pub last_used: Option<u64>,
    /// Unix seconds until which the account sits out after a 429.
    pub rate_limit_until: Option<u64>,
    /// Upstream rate-limit window reset timestamp last seen; counters are
    /// zeroed whenever this moves.
    pub window_reset_at: Option<u64>,
}

/// Usage recorded when a request completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One pooled upstream account.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Internal opaque id, stable across token refreshes.
    pub id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Upstream ChatGPT account id from the JWT claim; dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    /// Local key a client may present to use exactly this account.
    pub proxy_api_key: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub usage: AccountUsage,
    /// Unix seconds.
    pub added_at: u64,
}

impl AccountEntry {
    pub fn token_str(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn refresh_token_str(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .map(|t| t.expose_secret().as_str())
    }
}

impl std::fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountEntry")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("email", &self.email)
            .field("account_id", &self.account_id)
            .field("plan_type", &self.plan_type)
            .field("status", &self.status)
            .field("usage", &self.usage)
            .finish()
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage (accounts.json).
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AccountEntry {
        AccountEntry {
            id: "acct_0001".into(),
            token: Secret::new("eyJ.token".into()),
            refresh_token: Some(Secret::new("rt".into())),
            email: Some("dev@example.com".into()),
            account_id: Some("upstream-1".into()),
            plan_type: Some("plus".into()),
            proxy_api_key: "ck-test".into(),
            status: AccountStatus::Active,
            usage: AccountUsage::default(),
            added_at: 1_750_000_000,
        }
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&entry()).unwrap();
        let back: AccountEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "acct_0001");
        assert_eq!(back.token_str(), "eyJ.token");
        assert_eq!(back.refresh_token_str(), Some("rt"));
        assert_eq!(back.status, AccountStatus::Active);
    }

    #[test]
    fn status_uses_snake_case() {
        let json = serde_json::to_string(&AccountStatus::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }

    #[test]
    fn debug_redacts_tokens() {
        let s = format!("{:?}", entry());
        assert!(!s.contains("eyJ.token"));
        assert!(s.contains("[REDACTED]"));
    }
}
