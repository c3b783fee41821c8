//! OpenAI-compatible endpoints.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use courier_protocols::{catalog, openai};

use crate::{
    chat::{authorize_client, handle_chat},
    error::{self, Protocol},
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/models/{id}", get(get_model))
        .route("/v1/models/{id}/info", get(get_model))
}

/// Bearer token from the Authorization header.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

async fn chat_completions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = bearer(&headers);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::OpenAi).await {
        return resp;
    }

    let request: openai::ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error::bad_request(Protocol::OpenAi, &format!("invalid request: {e}")),
    };

    let translated = match openai::translate(&request, &state.translate_options()) {
        Ok(translated) => translated,
        Err(message) => return error::bad_request(Protocol::OpenAi, &message),
    };

    handle_chat(state, translated, Protocol::OpenAi).await
}

async fn list_models(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let key = bearer(&headers);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::OpenAi).await {
        return resp;
    }
    Json(openai::models_response()).into_response()
}

async fn get_model(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let key = bearer(&headers);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::OpenAi).await {
        return resp;
    }
    let resolved = catalog::resolve(Some(&id), &state.config.model.default);
    match catalog::get(&resolved) {
        Some(model) => Json(openai::model_object(model)).into_response(),
        None => error::error_response(
            Protocol::OpenAi,
            axum::http::StatusCode::NOT_FOUND,
            &format!("model '{id}' not found"),
            Some("model_not_found"),
        ),
    }
}
