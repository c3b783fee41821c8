//! Protocol-specific error payloads.
//!
//! Each compatibility surface has its own error envelope; the same internal
//! condition must come out shaped for whichever client asked.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Anthropic,
    Gemini,
}

/// Build a protocol-shaped error response.
pub fn error_response(
    protocol: Protocol,
    status: StatusCode,
    message: &str,
    code: Option<&str>,
) -> Response {
    let body = match protocol {
        Protocol::OpenAi => serde_json::json!({
            "error": {
                "message": message,
                "type": openai_type(status),
                "param": null,
                "code": code,
            }
        }),
        Protocol::Anthropic => serde_json::json!({
            "type": "error",
            "error": {
                "type": anthropic_type(status),
                "message": message,
            }
        }),
        Protocol::Gemini => serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": gemini_status(status),
            }
        }),
    };
    (status, Json(body)).into_response()
}

/// 400 with a protocol-appropriate invalid-request payload.
pub fn bad_request(protocol: Protocol, message: &str) -> Response {
    error_response(protocol, StatusCode::BAD_REQUEST, message, None)
}

/// 401 for a missing/invalid proxy key or an empty account pool.
pub fn unauthorized(protocol: Protocol, message: &str) -> Response {
    error_response(protocol, StatusCode::UNAUTHORIZED, message, None)
}

/// Pool exhaustion: every protocol has its own idiom for "try again later".
pub fn no_available_accounts(protocol: Protocol) -> Response {
    match protocol {
        Protocol::OpenAi => error_response(
            protocol,
            StatusCode::SERVICE_UNAVAILABLE,
            "No accounts are currently available",
            Some("no_available_accounts"),
        ),
        // Anthropic's convention is 529 overloaded.
        Protocol::Anthropic => {
            let status = StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            let body = serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "All accounts are busy or unavailable"},
            });
            (status, Json(body)).into_response()
        },
        Protocol::Gemini => error_response(
            protocol,
            StatusCode::SERVICE_UNAVAILABLE,
            "No accounts are currently available",
            None,
        ),
    }
}

pub fn rate_limited(protocol: Protocol, message: &str) -> Response {
    error_response(protocol, StatusCode::TOO_MANY_REQUESTS, message, None)
}

/// Upstream transport failures come out as 502.
pub fn bad_gateway(protocol: Protocol, message: &str) -> Response {
    error_response(protocol, StatusCode::BAD_GATEWAY, message, None)
}

fn openai_type(status: StatusCode) -> &'static str {
    match status.as_u16() {
        429 => "rate_limit_error",
        s if s >= 500 => "server_error",
        _ => "invalid_request_error",
    }
}

fn anthropic_type(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid_request_error",
        401 | 403 => "authentication_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "api_error",
    }
}

fn gemini_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500 | 502 => "INTERNAL",
        503 => "UNAVAILABLE",
        _ => "UNKNOWN",
    }
}
