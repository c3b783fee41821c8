//! Shared application state.
//!
//! Everything the handlers need is constructed once at startup and passed
//! around behind one `Arc`. The pool, cookie jar, and session cache are the
//! only shared mutable pieces; each serializes its own mutations.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{info, warn},
};

use {
    courier_accounts::{AccountPool, RefreshScheduler},
    courier_config::CourierConfig,
    courier_oauth::{CallbackServer, OAuthConfig, OAuthFlow, PendingAuthStore, TokenSet},
    courier_protocols::{TranslateOptions, context},
    courier_sessions::SessionCache,
    courier_transport::{cookies::CookieJar, headers::HeaderBuilder},
    courier_upstream::ResponsesClient,
};

use crate::update::UpdateWatcher;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: CourierConfig,
    pub fingerprint: Arc<courier_config::FingerprintStore>,
    pub pool: Arc<AccountPool>,
    pub cookies: Arc<CookieJar>,
    pub sessions: Arc<SessionCache>,
    pub pending_auth: Arc<PendingAuthStore>,
    pub oauth: Arc<OAuthFlow>,
    pub callback: Arc<CallbackServer>,
    pub refresh: Arc<RefreshScheduler>,
    pub upstream: Arc<ResponsesClient>,
    pub update: Arc<UpdateWatcher>,
    /// Sink the callback listener delivers token sets into.
    pub login_sink: mpsc::Sender<TokenSet>,
    pub started_at: Instant,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build every component and start the background tasks. Failure to
    /// initialize the transport is fatal by design: without impersonation
    /// every upstream call would be rejected anyway.
    pub async fn initialize(config: CourierConfig) -> anyhow::Result<SharedState> {
        let transport = courier_transport::init(
            &config.tls,
            Duration::from_secs(config.api.timeout_seconds),
        )?;
        Self::initialize_with_transport(config, transport).await
    }

    /// As [`initialize`](Self::initialize), with the transport supplied by
    /// the caller (tests inject a scripted one).
    pub async fn initialize_with_transport(
        config: CourierConfig,
        transport: Arc<dyn courier_transport::Transport>,
    ) -> anyhow::Result<SharedState> {
        let fingerprint = Arc::new(courier_config::FingerprintStore::load(
            &config.update.fingerprint_path,
        ));

        context::init_from(
            config
                .model
                .context_prompt_path
                .as_deref()
                .map(std::path::Path::new),
        );

        let pool = AccountPool::load(
            config.data_path("accounts.json"),
            config.auth.rotation_strategy,
            Duration::from_secs(config.auth.rate_limit_backoff_seconds),
        );
        let cookies = CookieJar::load(config.data_path("cookies.json"));
        let sessions = Arc::new(SessionCache::new(
            Duration::from_secs(config.session.ttl_minutes * 60),
            config.session.max_entries,
        ));

        let oauth = Arc::new(OAuthFlow::new(OAuthConfig {
            client_id: config.auth.oauth_client_id.clone(),
            auth_url: config.auth.oauth_auth_endpoint.clone(),
            token_url: config.auth.oauth_token_endpoint.clone(),
            redirect_uri: format!(
                "http://localhost:{}/auth/callback",
                config.auth.oauth_callback_port
            ),
            scopes: vec![],
            device_auth_url: None,
        }));
        let refresh = RefreshScheduler::new(
            pool.clone(),
            oauth.clone(),
            Duration::from_secs(config.auth.refresh_margin_seconds),
        );
        refresh.schedule_all().await;

        let header_builder = HeaderBuilder::new(fingerprint.get());
        let upstream = Arc::new(ResponsesClient::new(
            transport.clone(),
            header_builder,
            config.api.base_url.clone(),
        ));

        let update = UpdateWatcher::new(
            config.update.clone(),
            fingerprint.clone(),
            transport.clone(),
            config.data_path("update-state.json"),
        );

        let pending_auth = Arc::new(PendingAuthStore::new());
        let (login_tx, login_rx) = mpsc::channel::<TokenSet>(8);

        let state = Arc::new(Self {
            fingerprint,
            pool,
            cookies,
            sessions,
            pending_auth,
            oauth,
            callback: Arc::new(CallbackServer::new()),
            refresh,
            upstream,
            update,
            login_sink: login_tx,
            started_at: Instant::now(),
            background: Mutex::new(Vec::new()),
            config,
        });

        state.spawn_background(login_rx);
        Ok(state)
    }

    /// Translation defaults derived from config.
    pub fn translate_options(&self) -> TranslateOptions {
        TranslateOptions {
            default_model: self.config.model.default.clone(),
            default_effort: self.config.model.default_reasoning_effort,
        }
    }

    /// Add an account from a token set (OAuth callback, device flow, paste).
    pub async fn adopt_tokens(&self, tokens: &TokenSet) -> courier_common::Result<String> {
        let entry = self
            .pool
            .add_account(tokens.access_token_str(), tokens.refresh_token_str())
            .await?;
        self.refresh.schedule(&entry.id).await;
        Ok(entry.id)
    }

    fn spawn_background(self: &Arc<Self>, mut login_rx: mpsc::Receiver<TokenSet>) {
        let mut tasks = Vec::new();

        // Deliveries from the ephemeral callback listener.
        let state = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(tokens) = login_rx.recv().await {
                match state.adopt_tokens(&tokens).await {
                    Ok(entry_id) => info!(entry_id, "account added via login callback"),
                    Err(e) => warn!(error = %e, "failed to adopt login tokens"),
                }
            }
        }));

        tasks.push(self.sessions.spawn_sweeper(Duration::from_secs(
            self.config.session.cleanup_interval_minutes * 60,
        )));
        tasks.push(self.pending_auth.spawn_sweeper());

        if self.config.update.enabled {
            tasks.push(self.update.clone().spawn());
        }

        self.background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tasks);
    }

    /// Stop background work and flush persisted state. Called after the
    /// listener has drained.
    pub async fn shutdown(&self) {
        info!("shutting down components");
        self.refresh.shutdown();
        self.callback.stop();
        for task in self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        self.cookies.flush().await;
        self.pool.flush().await;
        self.update.flush().await;
    }
}
