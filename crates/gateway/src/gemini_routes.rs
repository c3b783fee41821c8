//! Gemini-compatible endpoints.
//!
//! Gemini paths embed the action in the final segment
//! (`/v1beta/models/{model}:generateContent`); the whole segment is captured
//! and split on the colon.

use std::collections::HashMap;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use courier_protocols::gemini;

use crate::{
    chat::{authorize_client, handle_chat},
    error::{self, Protocol},
    openai_routes::bearer,
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/v1beta/models", get(list_models))
        .route("/v1beta/models/{model_action}", post(generate))
}

/// `?key=`, `x-goog-api-key`, or Bearer.
fn api_key(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    query
        .get("key")
        .cloned()
        .or_else(|| {
            headers
                .get("x-goog-api-key")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
        .or_else(|| bearer(headers))
}

async fn generate(
    State(state): State<SharedState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = api_key(&headers, &query);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::Gemini).await {
        return resp;
    }

    let Some((model, action)) = model_action.split_once(':') else {
        return error::error_response(
            Protocol::Gemini,
            axum::http::StatusCode::NOT_FOUND,
            "expected models/{model}:generateContent",
            None,
        );
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return error::error_response(
                Protocol::Gemini,
                axum::http::StatusCode::NOT_FOUND,
                &format!("unknown action '{action}'"),
                None,
            );
        },
    };

    let request: gemini::GenerateContentRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error::bad_request(Protocol::Gemini, &format!("invalid request: {e}")),
    };

    let translated =
        match gemini::translate(model, &request, stream, &state.translate_options()) {
            Ok(translated) => translated,
            Err(message) => return error::bad_request(Protocol::Gemini, &message),
        };

    handle_chat(state, translated, Protocol::Gemini).await
}

async fn list_models(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let key = api_key(&headers, &query);
    if let Err(resp) = authorize_client(&state, key.as_deref(), Protocol::Gemini).await {
        return resp;
    }
    Json(gemini::models_response()).into_response()
}
