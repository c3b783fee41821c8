//! Auth, account, and cookie management endpoints.
//!
//! These only require the server to be reachable; they run on localhost and
//! exist to get accounts into the pool.

use std::time::Instant;

use {
    axum::{
        Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{Html, IntoResponse, Json, Redirect, Response},
        routing::{delete, get, post},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
};

use {
    courier_accounts::AccountEntry,
    courier_oauth::{PendingAuth, generate_pkce, generate_state},
};

use crate::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/status", get(status))
        .route("/auth/login", get(login_redirect))
        .route("/auth/login-start", post(login_start))
        .route("/auth/code-relay", post(code_relay))
        .route("/auth/callback", get(callback))
        .route("/auth/token", post(paste_token))
        .route("/auth/logout", post(logout))
        .route("/auth/device-login", post(device_login))
        .route("/auth/device-poll/{device_code}", get(device_poll))
        .route("/auth/import-cli", post(import_cli))
        .route("/auth/accounts", get(list_accounts).post(add_account))
        .route("/auth/accounts/{id}", delete(remove_account))
        .route("/auth/accounts/{id}/reset-usage", post(reset_usage))
        .route("/auth/accounts/{id}/quota", get(account_quota))
        .route(
            "/auth/accounts/{id}/cookies",
            get(list_cookies).post(set_cookie).delete(clear_cookies),
        )
}

/// Public view of an account entry; tokens never leave the process.
fn account_view(entry: &AccountEntry) -> serde_json::Value {
    json!({
        "id": entry.id,
        "email": entry.email,
        "accountId": entry.account_id,
        "planType": entry.plan_type,
        "proxyApiKey": entry.proxy_api_key,
        "status": entry.status,
        "usage": entry.usage,
        "addedAt": entry.added_at,
    })
}

fn cookie_key(entry: &AccountEntry) -> String {
    entry.account_id.clone().unwrap_or_else(|| entry.id.clone())
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

// ── Status / login ──────────────────────────────────────────────────────────

async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let entries = state.pool.list().await;
    let active = entries
        .iter()
        .filter(|e| e.status == courier_accounts::AccountStatus::Active)
        .count();
    Json(json!({
        "authenticated": active > 0,
        "accounts": entries.len(),
        "active": active,
    }))
}

/// Begin a login attempt: PKCE, pending state, and the ephemeral callback
/// listener on the whitelisted port.
async fn begin_login(state: &SharedState, source: &str, return_host: Option<String>) -> Result<(String, String), Response> {
    let pkce = generate_pkce();
    let auth_state = generate_state();
    let redirect_uri = state.oauth.config().redirect_uri.clone();

    state.pending_auth.insert(auth_state.clone(), PendingAuth {
        code_verifier: pkce.verifier.clone(),
        redirect_uri: redirect_uri.clone(),
        return_host,
        source: source.to_string(),
        created_at: Instant::now(),
    });

    if let Err(e) = state
        .callback
        .start(
            state.config.auth.oauth_callback_port,
            state.oauth.clone(),
            state.pending_auth.clone(),
            state.login_sink.clone(),
        )
        .await
    {
        warn!(error = %e, "callback listener failed to start");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("callback listener: {e}")})),
        )
            .into_response());
    }

    let url = state
        .oauth
        .authorization_url(&auth_state, &pkce, &redirect_uri);
    Ok((url, auth_state))
}

#[axum::debug_handler]
async fn login_redirect(State(state): State<SharedState>) -> Response {
    match begin_login(&state, "browser", None).await {
        Ok((url, _)) => Redirect::temporary(&url).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginStartBody {
    return_host: Option<String>,
}

async fn login_start(
    State(state): State<SharedState>,
    body: axum::body::Bytes,
) -> Response {
    // The body is optional; an empty POST starts a plain local login.
    let parsed: LoginStartBody = serde_json::from_slice(&body).unwrap_or_default();
    match begin_login(&state, "web", parsed.return_host).await {
        Ok((url, auth_state)) => {
            Json(json!({"authUrl": url, "state": auth_state})).into_response()
        },
        Err(resp) => resp,
    }
}

#[derive(Deserialize)]
struct CodeRelayBody {
    url: String,
}

/// Accept a pasted callback URL from a remote-host login and finish the
/// exchange here.
async fn code_relay(State(state): State<SharedState>, Json(body): Json<CodeRelayBody>) -> Response {
    let parsed = match url::Url::parse(body.url.trim()) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("invalid callback url: {e}")),
    };
    let mut code = None;
    let mut auth_state = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => auth_state = Some(v.into_owned()),
            _ => {},
        }
    }
    let (Some(code), Some(auth_state)) = (code, auth_state) else {
        return bad_request("callback url is missing code or state".into());
    };
    finish_code_exchange(&state, &code, &auth_state).await
}

async fn callback(
    State(state): State<SharedState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let (Some(code), Some(auth_state)) = (params.get("code"), params.get("state")) else {
        return Html("<h1>Login failed</h1><p>missing code or state</p>".to_string())
            .into_response();
    };
    let result = finish_code_exchange(&state, code, auth_state).await;
    if result.status().is_success() {
        Html("<h1>Login complete</h1><p>You can close this window.</p>".to_string())
            .into_response()
    } else {
        result
    }
}

async fn finish_code_exchange(state: &SharedState, code: &str, auth_state: &str) -> Response {
    let Some(attempt) = state.pending_auth.take(auth_state) else {
        return bad_request("unknown or expired state".into());
    };
    match state
        .oauth
        .exchange(code, &attempt.code_verifier, &attempt.redirect_uri)
        .await
    {
        Ok(tokens) => match state.adopt_tokens(&tokens).await {
            Ok(entry_id) => {
                info!(entry_id, source = %attempt.source, "login complete");
                Json(json!({"success": true, "entryId": entry_id})).into_response()
            },
            Err(e) => bad_request(format!("token rejected: {e}")),
        },
        Err(e) => bad_request(format!("code exchange failed: {e}")),
    }
}

#[derive(Deserialize)]
struct PasteTokenBody {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn paste_token(
    State(state): State<SharedState>,
    Json(body): Json<PasteTokenBody>,
) -> Response {
    match state
        .pool
        .add_account(body.token.trim(), body.refresh_token.as_deref())
        .await
    {
        Ok(entry) => {
            state.refresh.schedule(&entry.id).await;
            Json(json!({"success": true, "account": account_view(&entry)})).into_response()
        },
        Err(e) => bad_request(e.to_string()),
    }
}

async fn logout(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let entries = state.pool.list().await;
    let mut removed = 0;
    for entry in entries {
        state.refresh.cancel(&entry.id);
        if state.pool.remove_account(&entry.id).await {
            removed += 1;
        }
    }
    Json(json!({"removed": removed}))
}

// ── Device flow ─────────────────────────────────────────────────────────────

async fn device_login(State(state): State<SharedState>) -> Response {
    match state.oauth.request_device_code().await {
        Ok(resp) => Json(json!({
            "deviceCode": resp.device_code,
            "userCode": resp.user_code,
            "verificationUri": resp.verification_uri,
            "verificationUriComplete": resp.verification_uri_complete,
            "interval": resp.interval,
        }))
        .into_response(),
        Err(e) => bad_request(format!("device login failed: {e}")),
    }
}

async fn device_poll(
    State(state): State<SharedState>,
    Path(device_code): Path<String>,
) -> Response {
    match state.oauth.poll_device_code(&device_code).await {
        Ok(Some(tokens)) => match state.adopt_tokens(&tokens).await {
            Ok(entry_id) => {
                Json(json!({"status": "complete", "entryId": entry_id})).into_response()
            },
            Err(e) => bad_request(format!("token rejected: {e}")),
        },
        Ok(None) => Json(json!({"status": "pending"})).into_response(),
        Err(e) => bad_request(format!("device poll failed: {e}")),
    }
}

// ── CLI import ──────────────────────────────────────────────────────────────

/// Import credentials from a codex CLI install (`$CODEX_HOME/auth.json`,
/// default `~/.codex/auth.json`).
async fn import_cli(State(state): State<SharedState>) -> Response {
    let path = std::env::var("CODEX_HOME")
        .map(std::path::PathBuf::from)
        .ok()
        .or_else(|| dirs_home().map(|home| home.join(".codex")))
        .map(|dir| dir.join("auth.json"));
    let Some(path) = path else {
        return bad_request("cannot locate a CLI auth file".into());
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => return bad_request(format!("read {}: {e}", path.display())),
    };
    let parsed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("parse {}: {e}", path.display())),
    };

    let token = parsed["tokens"]["access_token"]
        .as_str()
        .or_else(|| parsed["token"].as_str());
    let refresh = parsed["tokens"]["refresh_token"]
        .as_str()
        .or_else(|| parsed["refresh_token"].as_str());

    let Some(token) = token else {
        return bad_request("no access token in CLI auth file".into());
    };
    match state.pool.add_account(token, refresh).await {
        Ok(entry) => {
            state.refresh.schedule(&entry.id).await;
            Json(json!({"success": true, "account": account_view(&entry)})).into_response()
        },
        Err(e) => bad_request(e.to_string()),
    }
}

fn dirs_home() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}

// ── Accounts ────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
struct ListAccountsQuery {
    quota: bool,
}

async fn list_accounts(
    State(state): State<SharedState>,
    Query(query): Query<ListAccountsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.pool.list().await;
    let mut accounts = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut view = account_view(entry);
        if query.quota {
            match state
                .upstream
                .fetch_usage(entry.token_str(), entry.account_id.as_deref())
                .await
            {
                Ok(quota) => {
                    // Keep local counters aligned with the upstream window.
                    if let Some(reset_at) = quota.window_reset_at() {
                        state.pool.sync_rate_limit_window(&entry.id, reset_at).await;
                    }
                    if let (Some(obj), Ok(quota_json)) =
                        (view.as_object_mut(), serde_json::to_value(&quota))
                    {
                        obj.insert("quota".into(), quota_json);
                    }
                },
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "quota fetch failed");
                },
            }
        }
        accounts.push(view);
    }

    // Window syncs may have zeroed counters; re-read for the response.
    if query.quota {
        let refreshed = state.pool.list().await;
        for view in accounts.iter_mut() {
            let id = view["id"].as_str().map(ToString::to_string);
            if let Some(id) = id
                && let Some(entry) = refreshed.iter().find(|e| e.id == id)
                && let (Some(obj), Ok(usage)) =
                    (view.as_object_mut(), serde_json::to_value(entry.usage))
            {
                obj.insert("usage".into(), usage);
            }
        }
    }

    Json(json!({"accounts": accounts}))
}

#[derive(Deserialize)]
struct AddAccountBody {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn add_account(
    State(state): State<SharedState>,
    Json(body): Json<AddAccountBody>,
) -> Response {
    match state
        .pool
        .add_account(body.token.trim(), body.refresh_token.as_deref())
        .await
    {
        Ok(entry) => {
            state.refresh.schedule(&entry.id).await;
            Json(json!({"success": true, "account": account_view(&entry)})).into_response()
        },
        Err(e) => bad_request(e.to_string()),
    }
}

async fn remove_account(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    state.refresh.cancel(&id);
    let removed = state.pool.remove_account(&id).await;
    Json(json!({"removed": removed})).into_response()
}

async fn reset_usage(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    if state.pool.reset_usage(&id).await {
        Json(json!({"success": true})).into_response()
    } else {
        not_found("no such account")
    }
}

async fn account_quota(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Some(entry) = state.pool.get(&id).await else {
        return not_found("no such account");
    };
    match state
        .upstream
        .fetch_usage(entry.token_str(), entry.account_id.as_deref())
        .await
    {
        Ok(quota) => {
            if let Some(reset_at) = quota.window_reset_at() {
                state.pool.sync_rate_limit_window(&entry.id, reset_at).await;
            }
            Json(json!({"quota": quota})).into_response()
        },
        Err(e) => bad_request(format!("quota fetch failed: {e}")),
    }
}

// ── Cookies ─────────────────────────────────────────────────────────────────

async fn list_cookies(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Some(entry) = state.pool.get(&id).await else {
        return not_found("no such account");
    };
    let cookies: serde_json::Map<String, serde_json::Value> = state
        .cookies
        .list(&cookie_key(&entry))
        .await
        .into_iter()
        .map(|(name, cookie)| {
            (
                name,
                json!({"value": cookie.value, "expires": cookie.expires}),
            )
        })
        .collect();
    Json(serde_json::Value::Object(cookies)).into_response()
}

#[derive(Deserialize)]
struct SetCookieBody {
    name: String,
    value: String,
    #[serde(default)]
    expires: Option<u64>,
}

async fn set_cookie(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<SetCookieBody>,
) -> Response {
    let Some(entry) = state.pool.get(&id).await else {
        return not_found("no such account");
    };
    if body.name.trim().is_empty() {
        return bad_request("cookie name must not be empty".into());
    }
    state
        .cookies
        .set(&cookie_key(&entry), body.name.trim(), &body.value, body.expires)
        .await;
    Json(json!({"success": true})).into_response()
}

async fn clear_cookies(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Some(entry) = state.pool.get(&id).await else {
        return not_found("no such account");
    };
    let cleared = state.cookies.clear(&cookie_key(&entry)).await;
    Json(json!({"cleared": cleared})).into_response()
}
