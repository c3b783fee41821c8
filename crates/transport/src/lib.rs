//! The upstream transport.
//!
//! Every byte sent to the upstream must ride a TLS client hello, extension
//! set, and HTTP/2 framing indistinguishable from a specific Chromium build,
//! or the anti-bot layer rejects the connection before HTTP even starts.
//! Two interchangeable implementations provide that: a subprocess wrapping
//! the impersonating curl binary, and an in-process FFI binding to the
//! impersonating libcurl. Callers see one trait either way.

pub mod cli;
pub mod cookies;
#[allow(unsafe_code)] // raw libcurl symbols; confined to this module
pub mod ffi;
pub mod headers;
pub(crate) mod wire;

use std::{pin::Pin, sync::Arc, time::Duration};

use {
    bytes::Bytes,
    futures::Stream,
    thiserror::Error,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use courier_config::{TlsTransportKind, TransportConfig};

/// How long to wait for response headers before giving up on the upstream.
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Chromium's cipher list, exact order (TLS 1.3 suites first, then the 1.2
/// ECDSA/RSA pairs with CHACHA20 and the RSA fallbacks).
pub const CHROME_CIPHERS: &str = "TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384:TLS_CHACHA20_POLY1305_SHA256:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA:AES256-SHA";

/// Supported groups, post-quantum hybrid first.
pub const CHROME_CURVES: &str = "X25519MLKEM768:X25519:P-256:P-384";

/// HTTP/2 SETTINGS frame values Chromium sends.
pub const CHROME_H2_SETTINGS: &str = "1:65536;2:0;4:6291456;6:262144";
pub const CHROME_H2_WINDOW_UPDATE: u32 = 15_663_105;
pub const CHROME_H2_STREAM_WEIGHT: u32 = 256;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no response headers within {0:?}")]
    HeaderTimeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("impersonating transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Body chunks as they arrive on the wire.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A streaming response: status and headers surface as soon as the upstream
/// sends them; the body is consumed lazily.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Raw `Set-Cookie` lines, attributes intact, one per cookie.
    pub set_cookies: Vec<String>,
    pub body: BodyStream,
}

impl StreamingResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response for simple calls.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Uniform interface over the two impersonating implementations.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POST returning status/headers as soon as they arrive and a lazy body
    /// stream. `cancel` aborts the in-flight call and releases OS resources.
    async fn stream_post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse>;

    /// Simple GET, body buffered.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse>;

    /// Simple POST, body buffered.
    async fn post(&self, url: &str, headers: &[(String, String)], body: String)
    -> Result<HttpResponse>;

    /// Whether this transport really impersonates. Callers degrade
    /// content-encoding negotiation when it does not (a plain fallback cannot
    /// decompress brotli or zstd).
    fn is_impersonate(&self) -> bool;
}

/// Resolve the configured transport once at startup.
///
/// A pinned kind is used as-is; `auto` prefers the in-process library when a
/// compatible shared object is present, otherwise the subprocess binary.
/// Failure here is fatal: without impersonation every upstream call would be
/// rejected anyway.
pub fn init(config: &TransportConfig, timeout: Duration) -> Result<Arc<dyn Transport>> {
    let proxy = resolve_proxy(config);
    match config.transport {
        TlsTransportKind::Cli => {
            let t = cli::CliTransport::new(config, proxy, timeout)?;
            info!(binary = %t.binary(), "transport: impersonating curl subprocess");
            Ok(Arc::new(t))
        },
        TlsTransportKind::Ffi => {
            let t = ffi::FfiTransport::load(config, proxy, timeout)?;
            info!("transport: impersonating libcurl (in-process)");
            Ok(Arc::new(t))
        },
        TlsTransportKind::Auto => match ffi::FfiTransport::load(config, proxy.clone(), timeout) {
            Ok(t) => {
                info!("transport: impersonating libcurl (in-process, auto)");
                Ok(Arc::new(t))
            },
            Err(ffi_err) => {
                let t = cli::CliTransport::new(config, proxy, timeout).map_err(|cli_err| {
                    TransportError::Unavailable(format!(
                        "neither library ({ffi_err}) nor binary ({cli_err}) found"
                    ))
                })?;
                info!(binary = %t.binary(), "transport: impersonating curl subprocess (auto)");
                Ok(Arc::new(t))
            },
        },
    }
}

fn resolve_proxy(config: &TransportConfig) -> Option<String> {
    config
        .proxy_url
        .clone()
        .or_else(|| std::env::var("HTTPS_PROXY").ok())
        .or_else(|| std::env::var("HTTP_PROXY").ok())
        .filter(|p| !p.is_empty())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_response_header_lookup_is_case_insensitive() {
        let resp = StreamingResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "text/event-stream".into())],
            set_cookies: vec![],
            body: Box::pin(futures::stream::empty()),
        };
        assert_eq!(resp.header("content-type"), Some("text/event-stream"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn chrome_h2_settings_shape() {
        // Four settings, id:value pairs.
        assert_eq!(CHROME_H2_SETTINGS.split(';').count(), 4);
        assert!(CHROME_CIPHERS.starts_with("TLS_AES_128_GCM_SHA256"));
        assert!(CHROME_CURVES.starts_with("X25519MLKEM768"));
    }
}
