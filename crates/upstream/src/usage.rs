//! The upstream usage/quota endpoint.

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use courier_transport::headers::CallOptions;

use crate::{ResponsesClient, UpstreamError};

/// One rate-limit window as the upstream reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitWindow {
    pub used_percent: Option<f64>,
    pub reset_at: Option<u64>,
    pub window_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimits {
    pub primary_window: Option<RateLimitWindow>,
    pub secondary_window: Option<RateLimitWindow>,
}

/// Plan and rate-limit state for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountQuota {
    pub plan_type: Option<String>,
    pub rate_limit: RateLimits,
}

impl AccountQuota {
    /// The upstream's current window reset timestamp, when present.
    pub fn window_reset_at(&self) -> Option<u64> {
        self.rate_limit
            .primary_window
            .as_ref()
            .and_then(|w| w.reset_at)
    }
}

impl ResponsesClient {
    /// `GET /codex/usage` for one account.
    ///
    /// A non-impersonating fallback transport cannot decompress brotli or
    /// zstd, so its `Accept-Encoding` is pinned to what it can handle.
    pub async fn fetch_usage(
        &self,
        token: &str,
        account_id: Option<&str>,
    ) -> crate::Result<AccountQuota> {
        let url = format!("{}/codex/usage", self.base_url());
        let mut headers =
            self.header_builder()
                .authenticated(token, account_id, &CallOptions::default());

        if !self.transport().is_impersonate() {
            for (name, value) in headers.iter_mut() {
                if name == "accept-encoding" {
                    *value = "gzip, deflate".into();
                }
            }
        }

        let response = self.transport().get(&url, &headers).await?;
        if !(200..300).contains(&response.status) {
            return Err(UpstreamError::Status {
                status: response.status,
                message: format!("usage fetch failed ({})", response.status),
                body: response.body,
                retry_after: None,
            });
        }

        let quota: AccountQuota = serde_json::from_str(&response.body)
            .map_err(|e| UpstreamError::Protocol(format!("parse usage response: {e}")))?;
        debug!(plan = ?quota.plan_type, reset_at = ?quota.window_reset_at(), "usage fetched");
        Ok(quota)
    }
}
