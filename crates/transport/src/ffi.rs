//! In-process transport over the impersonating libcurl.
//!
//! The shared library is dlopen'd at startup and driven through a minimal
//! hand-rolled binding: opaque handle newtypes, typed views of the variadic
//! `curl_easy_setopt`, and callback trampolines whose state lives exactly as
//! long as the transfer that registered them. When the fork's
//! `curl_easy_impersonate` symbol is present, the single-switch profile is
//! preferred; otherwise the stock options that exist in plain libcurl are
//! applied as a best-effort approximation.

use std::{
    ffi::{CStr, CString, c_char, c_int, c_long, c_void},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use {
    bytes::Bytes,
    libloading::Library,
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use courier_config::TransportConfig;

use crate::{
    CHROME_CIPHERS, CHROME_CURVES, HEADER_TIMEOUT, HttpResponse, Result, StreamingResponse,
    Transport, TransportError, wire,
};

/// Shared-library names probed in order when none is configured.
const LIBRARY_CANDIDATES: &[&str] = &[
    "libcurl-impersonate-chrome.so.4",
    "libcurl-impersonate-chrome.so",
    "libcurl-impersonate.so.4",
    "libcurl-impersonate.so",
    "libcurl-impersonate-chrome.4.dylib",
    "libcurl-impersonate-chrome.dylib",
];

// ── Opaque handles and ABI constants ────────────────────────────────────────

#[repr(C)]
struct Curl {
    _private: [u8; 0],
}

#[repr(C)]
struct CurlSlist {
    _private: [u8; 0],
}

type CurlCode = c_int;

const CURLE_OK: CurlCode = 0;
const CURLE_ABORTED_BY_CALLBACK: CurlCode = 42;

const CURL_GLOBAL_DEFAULT: c_long = 3;

const CURLOPT_TIMEOUT: c_int = 13;
const CURLOPT_POST: c_int = 47;
const CURLOPT_NOPROGRESS: c_int = 43;
const CURLOPT_HTTP_VERSION: c_int = 84;
const CURLOPT_NOSIGNAL: c_int = 99;
const CURLOPT_WRITEDATA: c_int = 10001;
const CURLOPT_URL: c_int = 10002;
const CURLOPT_PROXY: c_int = 10004;
const CURLOPT_HTTPHEADER: c_int = 10023;
const CURLOPT_HEADERDATA: c_int = 10029;
const CURLOPT_XFERINFODATA: c_int = 10057;
const CURLOPT_SSL_CIPHER_LIST: c_int = 10083;
const CURLOPT_ACCEPT_ENCODING: c_int = 10102;
const CURLOPT_COPYPOSTFIELDS: c_int = 10165;
const CURLOPT_SSL_EC_CURVES: c_int = 10298;
const CURLOPT_WRITEFUNCTION: c_int = 20011;
const CURLOPT_HEADERFUNCTION: c_int = 20079;
const CURLOPT_XFERINFOFUNCTION: c_int = 20219;

const CURL_HTTP_VERSION_2TLS: c_long = 4;

const CURLINFO_RESPONSE_CODE: c_int = 0x0020_0002;

type GlobalInitFn = unsafe extern "C" fn(c_long) -> CurlCode;
type EasyInitFn = unsafe extern "C" fn() -> *mut Curl;
type EasyCleanupFn = unsafe extern "C" fn(*mut Curl);
type EasyPerformFn = unsafe extern "C" fn(*mut Curl) -> CurlCode;
type EasyStrerrorFn = unsafe extern "C" fn(CurlCode) -> *const c_char;
type SetoptStrFn = unsafe extern "C" fn(*mut Curl, c_int, *const c_char) -> CurlCode;
type SetoptLongFn = unsafe extern "C" fn(*mut Curl, c_int, c_long) -> CurlCode;
type SetoptPtrFn = unsafe extern "C" fn(*mut Curl, c_int, *mut c_void) -> CurlCode;
type SetoptWriteFn = unsafe extern "C" fn(*mut Curl, c_int, WriteCallback) -> CurlCode;
type SetoptXferFn = unsafe extern "C" fn(*mut Curl, c_int, XferCallback) -> CurlCode;
type SlistAppendFn = unsafe extern "C" fn(*mut CurlSlist, *const c_char) -> *mut CurlSlist;
type SlistFreeAllFn = unsafe extern "C" fn(*mut CurlSlist);
type GetinfoLongFn = unsafe extern "C" fn(*mut Curl, c_int, *mut c_long) -> CurlCode;
type ImpersonateFn = unsafe extern "C" fn(*mut Curl, *const c_char, c_int) -> CurlCode;

type WriteCallback = unsafe extern "C" fn(*mut c_char, usize, usize, *mut c_void) -> usize;
type XferCallback = unsafe extern "C" fn(*mut c_void, i64, i64, i64, i64) -> c_int;

/// Resolved symbol table. The fn pointers stay valid for as long as `_lib`
/// is loaded, which is the lifetime of the transport (and so the process).
struct CurlApi {
    _lib: Library,
    easy_init: EasyInitFn,
    easy_cleanup: EasyCleanupFn,
    easy_perform: EasyPerformFn,
    easy_strerror: EasyStrerrorFn,
    setopt_str: SetoptStrFn,
    setopt_long: SetoptLongFn,
    setopt_ptr: SetoptPtrFn,
    setopt_write: SetoptWriteFn,
    setopt_xfer: SetoptXferFn,
    slist_append: SlistAppendFn,
    slist_free_all: SlistFreeAllFn,
    getinfo_long: GetinfoLongFn,
    /// Fork-only single-switch profile; `None` against stock libcurl.
    impersonate: Option<ImpersonateFn>,
}

// SAFETY: libcurl easy handles are confined to one transfer on one thread;
// the symbol table itself is just immutable fn pointers.
unsafe impl Send for CurlApi {}
unsafe impl Sync for CurlApi {}

impl CurlApi {
    fn load(path: &PathBuf) -> Result<Self> {
        // SAFETY: loading a C library; no initializers run beyond libcurl's.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| TransportError::Unavailable(format!("{}: {e}", path.display())))?;

        // SAFETY: symbol names and signatures match the libcurl ABI.
        unsafe {
            let global_init: GlobalInitFn = *lib
                .get::<GlobalInitFn>(b"curl_global_init\0")
                .map_err(symbol_err)?;
            if global_init(CURL_GLOBAL_DEFAULT) != CURLE_OK {
                return Err(TransportError::Unavailable("curl_global_init failed".into()));
            }

            let impersonate = lib
                .get::<ImpersonateFn>(b"curl_easy_impersonate\0")
                .ok()
                .map(|s| *s);

            Ok(Self {
                easy_init: *lib.get(b"curl_easy_init\0").map_err(symbol_err)?,
                easy_cleanup: *lib.get(b"curl_easy_cleanup\0").map_err(symbol_err)?,
                easy_perform: *lib.get(b"curl_easy_perform\0").map_err(symbol_err)?,
                easy_strerror: *lib.get(b"curl_easy_strerror\0").map_err(symbol_err)?,
                setopt_str: *lib.get(b"curl_easy_setopt\0").map_err(symbol_err)?,
                setopt_long: *lib.get(b"curl_easy_setopt\0").map_err(symbol_err)?,
                setopt_ptr: *lib.get(b"curl_easy_setopt\0").map_err(symbol_err)?,
                setopt_write: *lib.get(b"curl_easy_setopt\0").map_err(symbol_err)?,
                setopt_xfer: *lib.get(b"curl_easy_setopt\0").map_err(symbol_err)?,
                slist_append: *lib.get(b"curl_slist_append\0").map_err(symbol_err)?,
                slist_free_all: *lib.get(b"curl_slist_free_all\0").map_err(symbol_err)?,
                getinfo_long: *lib.get(b"curl_easy_getinfo\0").map_err(symbol_err)?,
                impersonate,
                _lib: lib,
            })
        }
    }

    fn strerror(&self, code: CurlCode) -> String {
        // SAFETY: strerror returns a static NUL-terminated string.
        unsafe {
            CStr::from_ptr((self.easy_strerror)(code))
                .to_string_lossy()
                .into_owned()
        }
    }
}

fn symbol_err(e: libloading::Error) -> TransportError {
    TransportError::Unavailable(format!("missing libcurl symbol: {e}"))
}

// ── Transfer state handed to the C callbacks ────────────────────────────────

/// Registered as HEADERDATA/WRITEDATA/XFERINFODATA for exactly one transfer;
/// allocated before `curl_easy_perform` and dropped after it returns, so the
/// C side can never observe a dangling pointer.
struct TransferState {
    head_lines: Vec<String>,
    head_tx: Option<oneshot::Sender<wire::ResponseHead>>,
    body_tx: Option<mpsc::Sender<Result<Bytes>>>,
    /// Buffered mode (simple GET/POST) collects here instead.
    collected: Vec<u8>,
    cancel: CancellationToken,
    headers_sent: bool,
}

unsafe extern "C" fn header_cb(
    ptr: *mut c_char,
    size: usize,
    nmemb: usize,
    userdata: *mut c_void,
) -> usize {
    let total = size * nmemb;
    // SAFETY: libcurl hands us `total` valid bytes and our registered state.
    let (line, state) = unsafe {
        let bytes = std::slice::from_raw_parts(ptr as *const u8, total);
        (
            String::from_utf8_lossy(bytes).into_owned(),
            &mut *(userdata as *mut TransferState),
        )
    };

    let trimmed = line.trim_end_matches(['\r', '\n']);
    if !trimmed.is_empty() {
        state.head_lines.push(trimmed.to_string());
        return total;
    }

    // Blank line: end of a header block.
    let lines: Vec<&str> = state.head_lines.iter().map(String::as_str).collect();
    match wire::parse_head(&lines) {
        Ok(head) if head.status / 100 == 1 => {
            // Interim block; the real one follows.
            state.head_lines.clear();
        },
        Ok(head) => {
            state.headers_sent = true;
            if let Some(tx) = state.head_tx.take() {
                let _ = tx.send(head);
            }
        },
        Err(_) => return 0, // malformed head aborts the transfer
    }
    total
}

unsafe extern "C" fn write_cb(
    ptr: *mut c_char,
    size: usize,
    nmemb: usize,
    userdata: *mut c_void,
) -> usize {
    let total = size * nmemb;
    // SAFETY: as in `header_cb`.
    let (bytes, state) = unsafe {
        (
            std::slice::from_raw_parts(ptr as *const u8, total).to_vec(),
            &mut *(userdata as *mut TransferState),
        )
    };

    match &state.body_tx {
        Some(tx) => {
            if tx.blocking_send(Ok(Bytes::from(bytes))).is_err() {
                // Receiver gone: abort the transfer.
                return 0;
            }
        },
        None => state.collected.extend_from_slice(&bytes),
    }
    total
}

unsafe extern "C" fn xfer_cb(
    userdata: *mut c_void,
    _dltotal: i64,
    _dlnow: i64,
    _ultotal: i64,
    _ulnow: i64,
) -> c_int {
    // SAFETY: as in `header_cb`.
    let state = unsafe { &mut *(userdata as *mut TransferState) };
    c_int::from(state.cancel.is_cancelled())
}

// ── Transport implementation ────────────────────────────────────────────────

pub struct FfiTransport {
    api: Arc<CurlApi>,
    proxy: Option<String>,
    timeout: Duration,
    profile: String,
}

impl FfiTransport {
    pub fn load(
        config: &TransportConfig,
        proxy: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let candidates: Vec<PathBuf> = match &config.library_path {
            Some(explicit) => vec![PathBuf::from(explicit)],
            None => LIBRARY_CANDIDATES.iter().map(PathBuf::from).collect(),
        };

        let mut last_err = TransportError::Unavailable("no library candidates".into());
        for candidate in candidates {
            match CurlApi::load(&candidate) {
                Ok(api) => {
                    if api.impersonate.is_none() {
                        warn!(
                            path = %candidate.display(),
                            "library lacks curl_easy_impersonate; applying stock TLS options only"
                        );
                    }
                    return Ok(Self {
                        api: Arc::new(api),
                        proxy,
                        timeout,
                        profile: config.impersonate_profile.clone(),
                    });
                },
                Err(e) => {
                    debug!(path = %candidate.display(), error = %e, "library candidate rejected");
                    last_err = e;
                },
            }
        }
        Err(last_err)
    }

    /// Run one transfer on a blocking thread. `body_tx = Some` streams the
    /// body; `None` buffers it into the returned vec.
    #[allow(clippy::too_many_arguments)]
    fn perform_blocking(
        api: &CurlApi,
        url: &CString,
        header_lines: &[CString],
        post_body: Option<&CString>,
        proxy: Option<&CString>,
        profile: &CString,
        timeout: Duration,
        head_tx: Option<oneshot::Sender<wire::ResponseHead>>,
        body_tx: Option<mpsc::Sender<Result<Bytes>>>,
        cancel: CancellationToken,
    ) -> std::result::Result<(u16, Vec<u8>), TransportError> {
        // SAFETY: one easy handle, one thread, options set before perform,
        // state outlives perform, handle cleaned up on every path.
        unsafe {
            let easy = (api.easy_init)();
            if easy.is_null() {
                return Err(TransportError::message("curl_easy_init returned null"));
            }

            let mut state = Box::new(TransferState {
                head_lines: Vec::new(),
                head_tx,
                body_tx,
                collected: Vec::new(),
                cancel,
                headers_sent: false,
            });
            let state_ptr = &mut *state as *mut TransferState as *mut c_void;

            let mut slist: *mut CurlSlist = std::ptr::null_mut();
            for line in header_lines {
                slist = (api.slist_append)(slist, line.as_ptr());
            }

            let result = (|| {
                (api.setopt_str)(easy, CURLOPT_URL, url.as_ptr());
                (api.setopt_long)(easy, CURLOPT_NOSIGNAL, 1);
                (api.setopt_long)(easy, CURLOPT_TIMEOUT, timeout.as_secs() as c_long);
                (api.setopt_str)(easy, CURLOPT_ACCEPT_ENCODING, c"".as_ptr());
                if !slist.is_null() {
                    (api.setopt_ptr)(easy, CURLOPT_HTTPHEADER, slist as *mut c_void);
                }
                if let Some(body) = post_body {
                    (api.setopt_long)(easy, CURLOPT_POST, 1);
                    (api.setopt_str)(easy, CURLOPT_COPYPOSTFIELDS, body.as_ptr());
                }
                if let Some(proxy) = proxy {
                    (api.setopt_str)(easy, CURLOPT_PROXY, proxy.as_ptr());
                }

                match api.impersonate {
                    Some(impersonate) => {
                        let code = impersonate(easy, profile.as_ptr(), 1);
                        if code != CURLE_OK {
                            return Err(TransportError::message(format!(
                                "curl_easy_impersonate({:?}): {}",
                                profile,
                                api.strerror(code)
                            )));
                        }
                    },
                    None => {
                        (api.setopt_str)(easy, CURLOPT_SSL_CIPHER_LIST, {
                            static CIPHERS: std::sync::OnceLock<CString> = std::sync::OnceLock::new();
                            CIPHERS
                                .get_or_init(|| {
                                    CString::new(CHROME_CIPHERS).unwrap_or_default()
                                })
                                .as_ptr()
                        });
                        (api.setopt_str)(easy, CURLOPT_SSL_EC_CURVES, {
                            static CURVES: std::sync::OnceLock<CString> = std::sync::OnceLock::new();
                            CURVES
                                .get_or_init(|| CString::new(CHROME_CURVES).unwrap_or_default())
                                .as_ptr()
                        });
                        (api.setopt_long)(easy, CURLOPT_HTTP_VERSION, CURL_HTTP_VERSION_2TLS);
                    },
                }

                (api.setopt_write)(easy, CURLOPT_HEADERFUNCTION, header_cb);
                (api.setopt_ptr)(easy, CURLOPT_HEADERDATA, state_ptr);
                (api.setopt_write)(easy, CURLOPT_WRITEFUNCTION, write_cb);
                (api.setopt_ptr)(easy, CURLOPT_WRITEDATA, state_ptr);
                (api.setopt_xfer)(easy, CURLOPT_XFERINFOFUNCTION, xfer_cb);
                (api.setopt_ptr)(easy, CURLOPT_XFERINFODATA, state_ptr);
                (api.setopt_long)(easy, CURLOPT_NOPROGRESS, 0);

                let code = (api.easy_perform)(easy);
                if code == CURLE_ABORTED_BY_CALLBACK && state.cancel.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                if code != CURLE_OK {
                    return Err(TransportError::message(api.strerror(code)));
                }

                let mut status: c_long = 0;
                (api.getinfo_long)(easy, CURLINFO_RESPONSE_CODE, &mut status);
                Ok(status as u16)
            })();

            // Unregister callback state before it drops: cleanup first, then
            // the Box goes out of scope.
            if !slist.is_null() {
                (api.slist_free_all)(slist);
            }
            (api.easy_cleanup)(easy);

            let collected = std::mem::take(&mut state.collected);
            match result {
                Ok(status) => Ok((status, collected)),
                Err(e) => {
                    if state.headers_sent
                        && let Some(tx) = &state.body_tx
                    {
                        // Mid-body failure: the stream consumer gets it.
                        let _ = tx.blocking_send(Err(e));
                        Ok((0, Vec::new()))
                    } else {
                        Err(e)
                    }
                },
            }
        }
    }

    fn cstrings(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<(CString, Vec<CString>, Option<CString>, Option<CString>, CString)> {
        let url = CString::new(url).map_err(|_| TransportError::message("NUL in url"))?;
        let header_lines = headers
            .iter()
            .map(|(k, v)| CString::new(format!("{k}: {v}")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| TransportError::message("NUL in header"))?;
        let body = body
            .map(CString::new)
            .transpose()
            .map_err(|_| TransportError::message("NUL in body"))?;
        let proxy = self
            .proxy
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| TransportError::message("NUL in proxy"))?;
        let profile = CString::new(self.profile.as_str())
            .map_err(|_| TransportError::message("NUL in profile"))?;
        Ok((url, header_lines, body, proxy, profile))
    }

    async fn run_buffered(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpResponse> {
        let (url, header_lines, body, proxy, profile) = self.cstrings(url, headers, body)?;
        let api = self.api.clone();
        let timeout = self.timeout;

        let (status, bytes) = tokio::task::spawn_blocking(move || {
            Self::perform_blocking(
                &api,
                &url,
                &header_lines,
                body.as_ref(),
                proxy.as_ref(),
                &profile,
                timeout,
                None,
                None,
                CancellationToken::new(),
            )
        })
        .await
        .map_err(|e| TransportError::message(format!("transfer task panicked: {e}")))??;

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for FfiTransport {
    async fn stream_post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse> {
        let (url, header_lines, body, proxy, profile) =
            self.cstrings(url, headers, Some(&body))?;
        let api = self.api.clone();
        let timeout = self.timeout;

        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel::<Result<Bytes>>(32);

        let handle = tokio::task::spawn_blocking(move || {
            Self::perform_blocking(
                &api,
                &url,
                &header_lines,
                body.as_ref(),
                proxy.as_ref(),
                &profile,
                timeout,
                Some(head_tx),
                Some(body_tx),
                cancel,
            )
        });

        let head = match tokio::time::timeout(HEADER_TIMEOUT, head_rx).await {
            Ok(Ok(head)) => head,
            Ok(Err(_)) => {
                // Sender dropped: the transfer failed before headers.
                return match handle
                    .await
                    .map_err(|e| TransportError::message(format!("transfer task panicked: {e}")))?
                {
                    Ok(_) => Err(TransportError::message("upstream closed before headers")),
                    Err(e) => Err(e),
                };
            },
            Err(_) => return Err(TransportError::HeaderTimeout(HEADER_TIMEOUT)),
        };

        let stream = tokio_stream::wrappers::ReceiverStream::new(body_rx);
        Ok(StreamingResponse {
            status: head.status,
            headers: head.headers,
            set_cookies: head.set_cookies,
            body: Box::pin(stream),
        })
    }

    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.run_buffered(url, headers, None).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse> {
        self.run_buffered(url, headers, Some(&body)).await
    }

    fn is_impersonate(&self) -> bool {
        self.api.impersonate.is_some()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bogus_library_path_is_unavailable() {
        let config = TransportConfig {
            library_path: Some("/nonexistent/libcurl-impersonate.so".into()),
            ..TransportConfig::default()
        };
        let err = FfiTransport::load(&config, None, Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[test]
    fn header_cb_assembles_head_and_signals() {
        let (head_tx, mut head_rx) = oneshot::channel();
        let mut state = TransferState {
            head_lines: Vec::new(),
            head_tx: Some(head_tx),
            body_tx: None,
            collected: Vec::new(),
            cancel: CancellationToken::new(),
            headers_sent: false,
        };
        let ptr = &mut state as *mut TransferState as *mut c_void;

        for line in [
            "HTTP/2 200\r\n",
            "content-type: text/event-stream\r\n",
            "set-cookie: cf_clearance=z; Path=/\r\n",
            "\r\n",
        ] {
            let mut bytes = line.as_bytes().to_vec();
            let written =
                unsafe { header_cb(bytes.as_mut_ptr() as *mut c_char, 1, bytes.len(), ptr) };
            assert_eq!(written, bytes.len());
        }

        assert!(state.headers_sent);
        let head = head_rx.try_recv().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.set_cookies, vec!["cf_clearance=z; Path=/".to_string()]);
    }

    #[test]
    fn interim_100_block_resets_lines() {
        let (head_tx, mut head_rx) = oneshot::channel();
        let mut state = TransferState {
            head_lines: Vec::new(),
            head_tx: Some(head_tx),
            body_tx: None,
            collected: Vec::new(),
            cancel: CancellationToken::new(),
            headers_sent: false,
        };
        let ptr = &mut state as *mut TransferState as *mut c_void;

        for line in ["HTTP/1.1 100 Continue\r\n", "\r\n", "HTTP/2 201\r\n", "\r\n"] {
            let mut bytes = line.as_bytes().to_vec();
            unsafe { header_cb(bytes.as_mut_ptr() as *mut c_char, 1, bytes.len(), ptr) };
        }
        assert_eq!(head_rx.try_recv().unwrap().status, 201);
    }

    #[test]
    fn write_cb_buffers_when_not_streaming() {
        let mut state = TransferState {
            head_lines: Vec::new(),
            head_tx: None,
            body_tx: None,
            collected: Vec::new(),
            cancel: CancellationToken::new(),
            headers_sent: true,
        };
        let ptr = &mut state as *mut TransferState as *mut c_void;
        let mut bytes = b"hello".to_vec();
        let written = unsafe { write_cb(bytes.as_mut_ptr() as *mut c_char, 1, 5, ptr) };
        assert_eq!(written, 5);
        assert_eq!(state.collected, b"hello");
    }

    #[test]
    fn xfer_cb_reports_cancellation() {
        let cancel = CancellationToken::new();
        let mut state = TransferState {
            head_lines: Vec::new(),
            head_tx: None,
            body_tx: None,
            collected: Vec::new(),
            cancel: cancel.clone(),
            headers_sent: false,
        };
        let ptr = &mut state as *mut TransferState as *mut c_void;
        assert_eq!(unsafe { xfer_cb(ptr, 0, 0, 0, 0) }, 0);
        cancel.cancel();
        assert_eq!(unsafe { xfer_cb(ptr, 0, 0, 0, 0) }, 1);
    }
}
