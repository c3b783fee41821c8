//! The request pipeline shared by all three compatibility surfaces.
//!
//! acquire → session lookup → upstream call (retrying transient failures
//! that happen before the first client byte) → re-encode → release.
//! Every path that acquires an account releases it, including client
//! disconnects mid-stream; the lease's drop guard is the backstop.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        body::Body,
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    bytes::Bytes,
    futures::StreamExt,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    courier_accounts::{AccountPool, UsageDelta},
    courier_protocols::{TranslatedRequest, anthropic, gemini, openai},
    courier_upstream::{ResponseEvent, TokenUsage, UpstreamError, UpstreamStream},
};

use crate::{
    error::{self, Protocol},
    state::SharedState,
};

/// Transient upstream failures retry this many times (first attempt + 2).
const MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Keeps acquire/release balanced. Normal paths call [`finish`]; the drop
/// guard covers panics and client disconnects mid-stream.
struct AccountLease {
    pool: Arc<AccountPool>,
    entry_id: String,
    done: bool,
}

impl AccountLease {
    fn new(pool: Arc<AccountPool>, entry_id: String) -> Self {
        Self {
            pool,
            entry_id,
            done: false,
        }
    }

    async fn finish(&mut self, usage: Option<UsageDelta>) {
        if self.done {
            return;
        }
        self.done = true;
        self.pool.release(&self.entry_id, usage).await;
    }

    /// The lock is already gone (rate-limit marking releases it).
    fn disarm(&mut self) {
        self.done = true;
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let pool = self.pool.clone();
        let entry_id = std::mem::take(&mut self.entry_id);
        tokio::spawn(async move {
            pool.release(&entry_id, None).await;
        });
    }
}

/// Per-protocol stream encoder, one interface.
enum Encoder {
    OpenAi(openai::StreamEncoder),
    Anthropic(anthropic::StreamEncoder),
    Gemini(gemini::StreamEncoder),
}

impl Encoder {
    fn new(protocol: Protocol, model: &str) -> Self {
        match protocol {
            Protocol::OpenAi => Self::OpenAi(openai::StreamEncoder::new(model)),
            Protocol::Anthropic => Self::Anthropic(anthropic::StreamEncoder::new(model)),
            Protocol::Gemini => Self::Gemini(gemini::StreamEncoder::new(model)),
        }
    }

    fn start(&mut self) -> Vec<String> {
        match self {
            Self::OpenAi(enc) => vec![enc.start()],
            Self::Anthropic(enc) => enc.start(0),
            Self::Gemini(_) => Vec::new(),
        }
    }

    fn delta(&mut self, text: &str) -> Vec<String> {
        match self {
            Self::OpenAi(enc) => enc.delta(text),
            Self::Anthropic(enc) => enc.delta(text),
            Self::Gemini(enc) => vec![enc.delta(text)],
        }
    }

    fn finish(&mut self, usage: TokenUsage) -> Vec<String> {
        match self {
            Self::OpenAi(enc) => enc.finish(),
            Self::Anthropic(enc) => enc.finish(usage),
            Self::Gemini(enc) => vec![enc.finish(usage)],
        }
    }
}

/// Gate a compatibility endpoint: when a proxy key is configured the client
/// must present it (the server-wide key or any account's local key). An
/// empty pool is not an auth failure; it surfaces as pool exhaustion when
/// acquire comes up empty.
pub async fn authorize_client(
    state: &SharedState,
    provided_key: Option<&str>,
    protocol: Protocol,
) -> Result<(), Response> {
    if let Some(expected) = &state.config.server.proxy_api_key {
        match provided_key {
            Some(key) if key == expected => {},
            Some(key) if state.pool.has_proxy_key(key).await => {},
            _ => {
                return Err(error::unauthorized(
                    protocol,
                    "invalid or missing API key",
                ));
            },
        }
    }
    Ok(())
}

/// Run one translated request end to end.
pub async fn handle_chat(
    state: SharedState,
    translated: TranslatedRequest,
    protocol: Protocol,
) -> Response {
    let Some(acquired) = state.pool.acquire().await else {
        return error::no_available_accounts(protocol);
    };
    let mut lease = AccountLease::new(state.pool.clone(), acquired.entry_id.clone());

    let mut request = translated.request;
    let prefix_hash = courier_sessions::SessionCache::prefix_hash(&translated.messages_for_hash);
    if let Some(hash) = &prefix_hash
        && let Some(previous) = state.sessions.get(hash)
    {
        debug!(hash = %hash, "session hit, threading previous response");
        request.previous_response_id = Some(previous);
    }

    let cookie_key = acquired
        .account_id
        .clone()
        .unwrap_or_else(|| acquired.entry_id.clone());
    let cookie = state.cookies.cookie_header(&cookie_key).await;

    // Retry loop: only failures that happen before any byte reaches the
    // client are retried. 4xx is never retried; 429 parks the account.
    let mut attempt: u32 = 0;
    let stream = loop {
        let cancel = CancellationToken::new();
        let result = state
            .upstream
            .stream_responses(
                &request,
                &acquired.token,
                acquired.account_id.as_deref(),
                cookie.clone(),
                cancel,
            )
            .await;

        match result {
            Ok(stream) => break stream,
            Err(e) if e.is_rate_limit() => {
                state
                    .pool
                    .mark_rate_limited(&acquired.entry_id, e.retry_after(), false)
                    .await;
                lease.disarm();
                return error::rate_limited(protocol, &error_message(&e));
            },
            Err(e) => {
                let status = e.status();
                let transient = status.is_none_or(|s| s >= 500);
                if transient && attempt < MAX_RETRIES {
                    let delay = RETRY_BASE * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(attempt, delay_secs = delay.as_secs(), error = %e, "transient upstream failure, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                lease.finish(None).await;
                return upstream_error_response(protocol, &e);
            },
        }
    };

    state.cookies.capture(&cookie_key, &stream.set_cookies).await;

    if translated.stream {
        stream_response(state, stream, lease, protocol, request.model, prefix_hash)
    } else {
        unary_response(state, stream, lease, protocol, request.model, prefix_hash).await
    }
}

/// Re-encode the upstream SSE into the client's wire format.
fn stream_response(
    state: SharedState,
    upstream: UpstreamStream,
    lease: AccountLease,
    protocol: Protocol,
    model: String,
    prefix_hash: Option<String>,
) -> Response {
    let body_stream = async_stream::stream! {
        let mut lease = lease;
        let mut encoder = Encoder::new(protocol, &model);
        let mut frames = upstream.frames;

        for event in encoder.start() {
            yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(event));
        }

        let mut response_id: Option<String> = None;
        let mut usage: Option<TokenUsage> = None;
        let mut completed = false;

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => match ResponseEvent::classify(&frame) {
                    ResponseEvent::Created { response_id: id }
                    | ResponseEvent::InProgress { response_id: id } => {
                        if response_id.is_none() {
                            response_id = id;
                        }
                    },
                    ResponseEvent::OutputTextDelta { delta } => {
                        for event in encoder.delta(&delta) {
                            yield Ok(Bytes::from(event));
                        }
                    },
                    ResponseEvent::Completed { response_id: id, usage: u } => {
                        if id.is_some() {
                            response_id = id;
                        }
                        usage = u;
                        completed = true;
                    },
                    ResponseEvent::OutputTextDone | ResponseEvent::Other => {},
                },
                Err(e) => {
                    // Mid-stream failure is fatal to this request.
                    warn!(error = %e, "upstream stream failed mid-flight");
                    break;
                },
            }
        }

        if completed {
            let final_usage = usage.unwrap_or_default();
            for event in encoder.finish(final_usage) {
                yield Ok(Bytes::from(event));
            }
            if let (Some(hash), Some(rid)) = (&prefix_hash, &response_id) {
                state.sessions.store(hash, rid);
            }
            lease.finish(Some(UsageDelta {
                input_tokens: final_usage.input_tokens,
                output_tokens: final_usage.output_tokens,
            }))
            .await;
        } else {
            lease.finish(None).await;
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Collect the whole stream and answer with a single JSON document.
async fn unary_response(
    state: SharedState,
    upstream: UpstreamStream,
    mut lease: AccountLease,
    protocol: Protocol,
    model: String,
    prefix_hash: Option<String>,
) -> Response {
    let mut frames = upstream.frames;
    let mut text = String::new();
    let mut response_id: Option<String> = None;
    let mut usage: Option<TokenUsage> = None;
    let mut completed = false;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => match ResponseEvent::classify(&frame) {
                ResponseEvent::Created { response_id: id }
                | ResponseEvent::InProgress { response_id: id } => {
                    if response_id.is_none() {
                        response_id = id;
                    }
                },
                ResponseEvent::OutputTextDelta { delta } => text.push_str(&delta),
                ResponseEvent::Completed { response_id: id, usage: u } => {
                    if id.is_some() {
                        response_id = id;
                    }
                    usage = u;
                    completed = true;
                },
                ResponseEvent::OutputTextDone | ResponseEvent::Other => {},
            },
            Err(e) => {
                lease.finish(None).await;
                return upstream_error_response(protocol, &e);
            },
        }
    }

    if !completed {
        lease.finish(None).await;
        return error::bad_gateway(protocol, "upstream stream ended before completion");
    }

    let final_usage = usage.unwrap_or_default();
    if let (Some(hash), Some(rid)) = (&prefix_hash, &response_id) {
        state.sessions.store(hash, rid);
    }
    lease
        .finish(Some(UsageDelta {
            input_tokens: final_usage.input_tokens,
            output_tokens: final_usage.output_tokens,
        }))
        .await;

    let body = match protocol {
        Protocol::OpenAi => openai::completion_response(&model, &text, final_usage),
        Protocol::Anthropic => anthropic::message_response(&model, &text, final_usage),
        Protocol::Gemini => gemini::generate_content_response(&model, &text, final_usage),
    };
    axum::Json(body).into_response()
}

fn error_message(e: &UpstreamError) -> String {
    match e {
        UpstreamError::Status { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Map an upstream failure onto the client protocol. Transport failures and
/// exhausted retries are 502; permanent 4xx pass their status through.
fn upstream_error_response(protocol: Protocol, e: &UpstreamError) -> Response {
    match e {
        UpstreamError::Status { status, message, .. } => {
            if *status >= 500 {
                error::error_response(
                    protocol,
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {message}"),
                    None,
                )
            } else {
                let status =
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                error::error_response(protocol, status, message, None)
            }
        },
        other => error::bad_gateway(protocol, &other.to_string()),
    }
}
