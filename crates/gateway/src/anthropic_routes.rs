//! Anthropic-compatible endpoints.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
    routing::post,
};

use courier_protocols::anthropic;

use crate::{
    chat::{authorize_client, handle_chat},
    error::{self, Protocol},
    openai_routes::bearer,
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::new().route("/v1/messages", post(messages))
}

/// Anthropic clients send `x-api-key`; Bearer is accepted as well.
fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .or_else(|| bearer(headers))
}

async fn messages(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    let key = api_key(&headers);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::Anthropic).await {
        return resp;
    }

    let request: anthropic::MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error::bad_request(Protocol::Anthropic, &format!("invalid request: {e}")),
    };

    let translated = match anthropic::translate(&request, &state.translate_options()) {
        Ok(translated) => translated,
        Err(message) => return error::bad_request(Protocol::Anthropic, &message),
    };

    handle_chat(state, translated, Protocol::Anthropic).await
}
