//! Device-authorization grant for logins on hosts without a browser.

use secrecy::Secret;

use crate::{
    Error, Result,
    flow::OAuthFlow,
    types::TokenSet,
};

/// Response from the device code request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, serde::Deserialize)]
struct TokenPollResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

impl OAuthFlow {
    /// Request a device code from the provider.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let resp = self
            .client()
            .post(self.config().device_endpoint())
            .header("Accept", "application/json")
            .form(&[("client_id", self.config().client_id.as_str()), ("scope", "")])
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!("device code request failed: {body}")));
        }

        Ok(resp.json().await?)
    }

    /// Poll the token endpoint once for a pending device authorization.
    ///
    /// Returns `Ok(Some(tokens))` when the user has approved, `Ok(None)` when
    /// authorization is still pending (`authorization_pending` / `slow_down`),
    /// and an error for terminal failures such as `access_denied`.
    pub async fn poll_device_code(&self, device_code: &str) -> Result<Option<TokenSet>> {
        let resp = self
            .client()
            .post(&self.config().token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config().client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?;

        let body: TokenPollResponse = resp.json().await?;

        if let Some(token) = body.access_token {
            let expires_at = body.expires_in.and_then(|secs| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs() + secs)
            });
            return Ok(Some(TokenSet {
                access_token: Secret::new(token),
                refresh_token: body.refresh_token.map(Secret::new),
                id_token: body.id_token.map(Secret::new),
                expires_at,
            }));
        }

        match body.error.as_deref() {
            Some("authorization_pending") | Some("slow_down") => Ok(None),
            Some(err) => Err(Error::message(format!("device flow error: {err}"))),
            None => Err(Error::message("unexpected response from token endpoint")),
        }
    }
}
