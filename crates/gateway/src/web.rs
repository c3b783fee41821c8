//! System endpoints: health, fingerprint debug, and a minimal status page.

use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
};

use courier_transport::headers::{CallOptions, HeaderBuilder};

use crate::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/debug/fingerprint", get(debug_fingerprint))
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let entries = state.pool.list().await;
    let active = entries
        .iter()
        .filter(|e| e.status == courier_accounts::AccountStatus::Active)
        .count();
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "accounts": entries.len(),
        "active_accounts": active,
    }))
}

/// What the upstream would see, minus credentials.
async fn debug_fingerprint(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let fingerprint = state.fingerprint.get();
    let builder = HeaderBuilder::new(fingerprint.clone());
    let sample: Vec<serde_json::Value> = builder
        .authenticated("<token>", Some("<account-id>"), &CallOptions::streaming_json())
        .into_iter()
        .map(|(name, value)| {
            let value = if name == "authorization" {
                "Bearer <token>".to_string()
            } else {
                value
            };
            serde_json::json!({"name": name, "value": value})
        })
        .collect();

    Json(serde_json::json!({
        "chromium_version": fingerprint.chromium_version,
        "app_version": fingerprint.app_version,
        "build_number": fingerprint.build_number,
        "user_agent": builder.user_agent(),
        "sec_ch_ua": builder.sec_ch_ua(),
        "header_order": fingerprint.header_order,
        "sample_headers": sample,
        "impersonating": state.upstream.transport().is_impersonate(),
    }))
}

async fn index(State(state): State<SharedState>) -> Response {
    let entries = state.pool.list().await;
    let active = entries
        .iter()
        .filter(|e| e.status == courier_accounts::AccountStatus::Active)
        .count();
    Html(format!(
        "<!doctype html><html><head><title>courier</title></head><body>\
         <h1>courier</h1>\
         <p>{active} of {} account(s) active.</p>\
         <p>Compatibility endpoints: <code>/v1/chat/completions</code>, \
         <code>/v1/messages</code>, <code>/v1beta/models/&#123;model&#125;:generateContent</code>.</p>\
         <p>Manage accounts via <code>/auth/accounts</code>.</p>\
         </body></html>",
        entries.len(),
    ))
    .into_response()
}
