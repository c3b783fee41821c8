//! Driving the Responses endpoint over the impersonating transport.

use std::sync::Arc;

use {
    futures::StreamExt,
    thiserror::Error,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use courier_transport::{
    StreamingResponse, Transport, TransportError,
    headers::{CallOptions, HeaderBuilder},
};

use crate::{
    protocol::ResponsesRequest,
    sse::{SseFrame, SseParser},
};

/// Error bodies are drained up to this cap, then the stream is cancelled.
const ERROR_BODY_CAP: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Non-2xx from the upstream, with the clipped body and the message
    /// extracted from it.
    #[error("upstream returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: String,
        /// `retry-after` seconds when the upstream sent one (429s).
        retry_after: Option<u64>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Protocol(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.status() == Some(429)
    }

    /// `retry-after` seconds, when the upstream sent one alongside a 429.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A live upstream response: cookies captured from the response head plus
/// the parsed SSE frame stream.
pub struct UpstreamStream {
    pub set_cookies: Vec<String>,
    pub frames: futures::stream::BoxStream<'static, crate::Result<SseFrame>>,
}

pub struct ResponsesClient {
    transport: Arc<dyn Transport>,
    headers: HeaderBuilder,
    base_url: String,
}

impl ResponsesClient {
    pub fn new(transport: Arc<dyn Transport>, headers: HeaderBuilder, base_url: String) -> Self {
        Self {
            transport,
            headers,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn header_builder(&self) -> &HeaderBuilder {
        &self.headers
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST the request and return the SSE frame stream.
    ///
    /// Non-2xx responses are drained (capped), cancelled, and surfaced as
    /// [`UpstreamError::Status`].
    pub async fn stream_responses(
        &self,
        request: &ResponsesRequest,
        token: &str,
        account_id: Option<&str>,
        cookie: Option<String>,
        cancel: CancellationToken,
    ) -> crate::Result<UpstreamStream> {
        let url = format!("{}/codex/responses", self.base_url);
        let mut opts = CallOptions::streaming_json();
        opts.cookie = cookie;
        let headers = self.headers.authenticated(token, account_id, &opts);

        let body = serde_json::to_string(request)
            .map_err(|e| UpstreamError::Protocol(format!("serialize request: {e}")))?;

        debug!(model = %request.model, threaded = request.previous_response_id.is_some(), "upstream request");
        let response = self
            .transport
            .stream_post(&url, &headers, body, cancel.clone())
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(drain_error(response, cancel).await);
        }

        let set_cookies = response.set_cookies.clone();
        let mut body = response.body;
        let frames = async_stream::stream! {
            let mut parser = SseParser::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => match parser.push(&bytes) {
                        Ok(frames) => {
                            for frame in frames {
                                yield Ok(frame);
                            }
                            if parser.is_done() {
                                break;
                            }
                        },
                        Err(e) => {
                            yield Err(UpstreamError::Protocol(e));
                            break;
                        },
                    },
                    Err(TransportError::Cancelled) => break,
                    Err(e) => {
                        yield Err(UpstreamError::Transport(e));
                        break;
                    },
                }
            }
        };

        Ok(UpstreamStream {
            set_cookies,
            frames: frames.boxed(),
        })
    }
}

/// Drain a non-2xx body up to the cap, cancel the remainder, and build the
/// typed error. JSON-shaped bodies contribute `detail` or `error.message`.
async fn drain_error(response: StreamingResponse, cancel: CancellationToken) -> UpstreamError {
    let status = response.status;
    let retry_after = response
        .header("retry-after")
        .and_then(|v| v.parse().ok());
    let mut collected: Vec<u8> = Vec::new();
    let mut body = response.body;

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                let room = ERROR_BODY_CAP - collected.len().min(ERROR_BODY_CAP);
                if room == 0 {
                    cancel.cancel();
                    // Let the transport observe the cancellation.
                    let _ = body.next().await;
                    break;
                }
                collected.extend_from_slice(&bytes[..bytes.len().min(room)]);
            },
            Err(_) => break,
        }
    }

    let body_text = String::from_utf8_lossy(&collected).into_owned();
    let message = extract_message(&body_text).unwrap_or_else(|| {
        if body_text.is_empty() {
            format!("HTTP {status}")
        } else {
            clip(&body_text, 300).to_string()
        }
    });
    warn!(status, message = %message, "upstream error response");

    UpstreamError::Status {
        status,
        message,
        body: body_text,
        retry_after,
    }
}

/// Prefer `detail`, then `error.message`, from a JSON error body.
fn extract_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    parsed
        .get("detail")
        .and_then(|v| v.as_str())
        .or_else(|| {
            parsed
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
        })
        .map(ToString::to_string)
}

fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use {bytes::Bytes, courier_config::Fingerprint};

    struct FakeTransport {
        status: u16,
        headers: Vec<(String, String)>,
        set_cookies: Vec<String>,
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn stream_post(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: String,
            _cancel: CancellationToken,
        ) -> courier_transport::Result<StreamingResponse> {
            let chunks: Vec<courier_transport::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(StreamingResponse {
                status: self.status,
                headers: self.headers.clone(),
                set_cookies: self.set_cookies.clone(),
                body: Box::pin(futures::stream::iter(chunks)),
            })
        }

        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> courier_transport::Result<courier_transport::HttpResponse> {
            unimplemented!("not used in these tests")
        }

        async fn post(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: String,
        ) -> courier_transport::Result<courier_transport::HttpResponse> {
            unimplemented!("not used in these tests")
        }

        fn is_impersonate(&self) -> bool {
            true
        }
    }

    fn client(transport: FakeTransport) -> ResponsesClient {
        ResponsesClient::new(
            Arc::new(transport),
            HeaderBuilder::new(Fingerprint::default()),
            "https://chatgpt.com/backend-api".into(),
        )
    }

    fn request() -> ResponsesRequest {
        ResponsesRequest::new("gpt-5-codex", "inst", vec![])
    }

    #[tokio::test]
    async fn streams_frames_and_cookies() {
        let c = client(FakeTransport {
            status: 200,
            headers: vec![("content-type".into(), "text/event-stream".into())],
            set_cookies: vec!["__cf_bm=x; Max-Age=1800".into()],
            chunks: vec![
                "event: response.created\ndata: {\"response\":{\"id\":\"r1\"}}\n\n",
                "event: response.output_text.delta\ndata: {\"delta\":\"Hi!\"}\n\n",
                "data: [DONE]\n\n",
            ],
        });

        let stream = c
            .stream_responses(&request(), "tok", None, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stream.set_cookies.len(), 1);

        let frames: Vec<_> = stream.frames.collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].as_ref().unwrap().event.as_deref(),
            Some("response.created")
        );
    }

    #[tokio::test]
    async fn non_2xx_extracts_detail() {
        let c = client(FakeTransport {
            status: 400,
            headers: vec![],
            set_cookies: vec![],
            chunks: vec!["{\"detail\":\"The model is not supported\"}"],
        });

        let err = c
            .stream_responses(&request(), "tok", None, None, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            UpstreamError::Status {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "The model is not supported");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_2xx_error_message_shape() {
        let c = client(FakeTransport {
            status: 429,
            headers: vec![("retry-after".into(), "30".into())],
            set_cookies: vec![],
            chunks: vec!["{\"error\":{\"message\":\"Rate limit exceeded\"}}"],
        });

        let err = c
            .stream_responses(&request(), "tok", None, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn raw_body_used_when_not_json() {
        let c = client(FakeTransport {
            status: 502,
            headers: vec![],
            set_cookies: vec![],
            chunks: vec!["bad gateway"],
        });

        let err = c
            .stream_responses(&request(), "tok", None, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad gateway"));
    }
}
