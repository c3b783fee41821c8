//! Ephemeral localhost listener for the OAuth redirect.
//!
//! The provider only whitelists a fixed localhost port, so the listener binds
//! exactly that port, serves exactly one path, and goes away as soon as it
//! has done its job: two seconds after a callback arrives, or five minutes
//! after start if none does. Starting a new listener closes any live one.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    axum::{Router, extract::Query, response::Html, routing::get},
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    flow::OAuthFlow,
    pending::PendingAuthStore,
    types::TokenSet,
};

const LINGER_AFTER_CALLBACK: Duration = Duration::from_secs(2);
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Single-flight localhost callback listener.
#[derive(Default)]
pub struct CallbackServer {
    active: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl CallbackServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `127.0.0.1:{port}` and serve `/auth/callback` until one callback
    /// lands (then linger two seconds) or the idle timeout passes.
    ///
    /// A successful callback is matched against `pending` by its `state`,
    /// exchanged for tokens, and delivered through `sink`.
    pub async fn start(
        &self,
        port: u16,
        flow: Arc<OAuthFlow>,
        pending: Arc<PendingAuthStore>,
        sink: mpsc::Sender<TokenSet>,
    ) -> Result<()> {
        // Only one listener may hold the whitelisted port.
        if let Some(prev) = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = prev.send(());
            // Give the previous listener a beat to release the port.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        debug!(port, "callback listener started");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Arc::new(std::sync::Mutex::new(Some(done_tx)));

        let app = Router::new().route(
            "/auth/callback",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let flow = flow.clone();
                let pending = pending.clone();
                let sink = sink.clone();
                let done = done_tx
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                async move {
                    let result = handle_callback(&params, &flow, &pending, &sink).await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    match result {
                        Ok(()) => Html(
                            "<h1>Login complete</h1><p>You can close this window.</p>".to_string(),
                        ),
                        Err(e) => {
                            warn!(error = %e, "callback rejected");
                            Html(format!("<h1>Login failed</h1><p>{e}</p>"))
                        },
                    }
                }
            }),
        );

        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            tokio::select! {
                _ = server.into_future() => {},
                _ = shutdown_rx => {
                    debug!("callback listener replaced");
                },
                _ = async {
                    let _ = done_rx.await;
                    tokio::time::sleep(LINGER_AFTER_CALLBACK).await;
                } => {
                    debug!("callback handled, listener closed");
                },
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    debug!("callback listener idle timeout");
                },
            }
        });

        Ok(())
    }

    /// Close the active listener, if any.
    pub fn stop(&self) {
        if let Some(prev) = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = prev.send(());
        }
    }
}

async fn handle_callback(
    params: &HashMap<String, String>,
    flow: &OAuthFlow,
    pending: &PendingAuthStore,
    sink: &mpsc::Sender<TokenSet>,
) -> Result<()> {
    let state = params
        .get("state")
        .ok_or_else(|| Error::message("missing state"))?;
    let code = params
        .get("code")
        .ok_or_else(|| Error::message("missing code"))?;
    let attempt = pending
        .take(state)
        .ok_or_else(|| Error::message("unknown or expired state"))?;

    let tokens = flow
        .exchange(code, &attempt.code_verifier, &attempt.redirect_uri)
        .await?;
    sink.send(tokens)
        .await
        .map_err(|_| Error::message("login sink closed"))?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use crate::{pending::PendingAuth, types::OAuthConfig};

    async fn start_token_mock() -> String {
        use axum::routing::post;
        let app = axum::Router::new().route(
            "/token",
            post(|| async {
                axum::Json(serde_json::json!({
                    "access_token": "at_cb",
                    "refresh_token": "rt_cb"
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn flow_for(token_base: &str) -> Arc<OAuthFlow> {
        Arc::new(OAuthFlow::new(OAuthConfig {
            client_id: "app_test".into(),
            auth_url: String::new(),
            token_url: format!("{token_base}/token"),
            redirect_uri: String::new(),
            scopes: vec![],
            device_auth_url: None,
        }))
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn callback_exchanges_and_delivers_tokens() {
        let token_base = start_token_mock().await;
        let flow = flow_for(&token_base);
        let pending = Arc::new(PendingAuthStore::new());
        pending.insert("st1".into(), PendingAuth {
            code_verifier: "verif".into(),
            redirect_uri: "http://localhost/auth/callback".into(),
            return_host: None,
            source: "web".into(),
            created_at: Instant::now(),
        });

        let (sink_tx, mut sink_rx) = mpsc::channel(1);
        let server = CallbackServer::new();
        let port = free_port();
        server.start(port, flow, pending, sink_tx).await.unwrap();

        let body = reqwest::get(format!(
            "http://127.0.0.1:{port}/auth/callback?code=c0de&state=st1"
        ))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
        assert!(body.contains("Login complete"), "{body}");

        let tokens = sink_rx.recv().await.unwrap();
        assert_eq!(tokens.access_token_str(), "at_cb");
        assert_eq!(tokens.refresh_token_str(), Some("rt_cb"));
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let token_base = start_token_mock().await;
        let flow = flow_for(&token_base);
        let pending = Arc::new(PendingAuthStore::new());

        let (sink_tx, _sink_rx) = mpsc::channel(1);
        let server = CallbackServer::new();
        let port = free_port();
        server.start(port, flow, pending, sink_tx).await.unwrap();

        let body = reqwest::get(format!(
            "http://127.0.0.1:{port}/auth/callback?code=c0de&state=nope"
        ))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
        assert!(body.contains("Login failed"), "{body}");
    }

    #[tokio::test]
    async fn restart_replaces_previous_listener() {
        let token_base = start_token_mock().await;
        let pending = Arc::new(PendingAuthStore::new());
        pending.insert("st2".into(), PendingAuth {
            code_verifier: "verif".into(),
            redirect_uri: "http://localhost/auth/callback".into(),
            return_host: None,
            source: "web".into(),
            created_at: Instant::now(),
        });

        let (sink_tx, mut sink_rx) = mpsc::channel(1);
        let server = CallbackServer::new();
        let port = free_port();
        server
            .start(port, flow_for(&token_base), pending.clone(), sink_tx.clone())
            .await
            .unwrap();
        // Second start on the same port must supplant the first listener.
        server
            .start(port, flow_for(&token_base), pending, sink_tx)
            .await
            .unwrap();

        let body = reqwest::get(format!(
            "http://127.0.0.1:{port}/auth/callback?code=c0de&state=st2"
        ))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
        assert!(body.contains("Login complete"), "{body}");
        assert!(sink_rx.recv().await.is_some());
    }
}
