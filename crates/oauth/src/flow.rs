use {secrecy::Secret, tracing::debug};

use crate::{
    Error, Result,
    pkce::PkceChallenge,
    types::{OAuthConfig, TokenSet},
};

const OAUTH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Manages the OAuth 2.0 authorization code flow with PKCE.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(OAUTH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Build the authorization URL.
    ///
    /// Assembled by hand rather than through a query-pair builder: the
    /// provider rejects `+`-encoded spaces in `scope`, so every value goes
    /// through percent-encoding (`%20` for spaces).
    pub fn authorization_url(&self, state: &str, pkce: &PkceChallenge, redirect_uri: &str) -> String {
        let scope = if self.config.scopes.is_empty() {
            "openid profile email offline_access".to_string()
        } else {
            self.config.scopes.join(" ")
        };

        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}&id_token_add_organizations=true&codex_cli_simplified_flow=true",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&pkce.challenge),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        debug!(token_url = %self.config.token_url, "exchanging authorization code");
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "code exchange failed ({status}): {}",
                clip(&body, 300)
            )));
        }

        parse_token_response(&resp.json::<serde_json::Value>().await?)
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "token refresh failed ({status}): {}",
                clip(&body, 300)
            )));
        }

        parse_token_response(&resp.json::<serde_json::Value>().await?)
    }
}

fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

fn parse_token_response(resp: &serde_json::Value) -> Result<TokenSet> {
    let access_token = resp["access_token"]
        .as_str()
        .ok_or_else(|| Error::message("missing access_token in response"))?
        .to_string();

    let refresh_token = resp["refresh_token"].as_str().map(ToString::to_string);
    let id_token = resp["id_token"].as_str().map(ToString::to_string);

    let expires_at = resp["expires_in"].as_u64().and_then(|secs| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() + secs)
    });

    Ok(TokenSet {
        access_token: Secret::new(access_token),
        refresh_token: refresh_token.map(Secret::new),
        id_token: id_token.map(Secret::new),
        expires_at,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use crate::pkce::generate_pkce;

    fn test_config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "app_test".into(),
            auth_url: "https://auth.example.com/oauth/authorize".into(),
            token_url,
            redirect_uri: "http://localhost:1455/auth/callback".into(),
            scopes: vec![],
            device_auth_url: None,
        }
    }

    /// Start a mock HTTP server and return its base URL.
    async fn start_mock(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn authorization_url_uses_percent20_for_spaces() {
        let flow = OAuthFlow::new(test_config("https://t".into()));
        let pkce = generate_pkce();
        let url = flow.authorization_url("st4te", &pkce, "http://localhost:1455/auth/callback");

        assert!(url.contains("scope=openid%20profile%20email%20offline_access"));
        assert!(!url.contains('+'));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=st4te"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A1455%2Fauth%2Fcallback"));
    }

    #[tokio::test]
    async fn exchange_parses_tokens() {
        use axum::routing::post;
        let app = axum::Router::new().route(
            "/token",
            post(|| async {
                axum::Json(serde_json::json!({
                    "access_token": "at_1",
                    "refresh_token": "rt_1",
                    "id_token": "idt_1",
                    "expires_in": 3600
                }))
            }),
        );
        let base = start_mock(app).await;
        let flow = OAuthFlow::new(test_config(format!("{base}/token")));

        let tokens = flow
            .exchange("code", "verifier", "http://localhost:1455/auth/callback")
            .await
            .unwrap();
        assert_eq!(tokens.access_token_str(), "at_1");
        assert_eq!(tokens.refresh_token_str(), Some("rt_1"));
        assert!(tokens.expires_at.is_some());
    }

    #[tokio::test]
    async fn exchange_surfaces_error_body() {
        use axum::routing::post;
        let app = axum::Router::new().route(
            "/token",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    "{\"error\":\"invalid_grant\"}",
                )
            }),
        );
        let base = start_mock(app).await;
        let flow = OAuthFlow::new(test_config(format!("{base}/token")));

        let err = flow
            .exchange("bad", "verifier", "http://localhost:1455/auth/callback")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn refresh_requires_access_token_in_response() {
        use axum::routing::post;
        let app = axum::Router::new()
            .route("/token", post(|| async { axum::Json(serde_json::json!({})) }));
        let base = start_mock(app).await;
        let flow = OAuthFlow::new(test_config(format!("{base}/token")));

        let err = flow.refresh("rt").await.unwrap_err();
        assert!(err.to_string().contains("missing access_token"));
    }
}
