//! Subprocess transport wrapping the impersonating curl binary.
//!
//! The fork's wrapper scripts (`curl_chrome136`) bake the full Chromium
//! profile in; the bare `curl-impersonate` binary needs the TLS and HTTP/2
//! shaping passed explicitly. Either way the response head is dumped to
//! stdout ahead of the body (`-D - -o -`), parsed as soon as the blank line
//! arrives, and the remainder is streamed.

use std::{process::Stdio, time::Duration};

use {
    bytes::{Bytes, BytesMut},
    tokio::io::AsyncReadExt,
    tokio::process::{Child, Command},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use courier_config::TransportConfig;

use crate::{
    CHROME_CIPHERS, CHROME_CURVES, CHROME_H2_SETTINGS, CHROME_H2_STREAM_WEIGHT,
    CHROME_H2_WINDOW_UPDATE, HEADER_TIMEOUT, HttpResponse, Result, StreamingResponse, Transport,
    TransportError, wire,
};

/// Binaries probed in order when none is configured.
const BINARY_CANDIDATES: &[&str] = &["curl_chrome136", "curl-impersonate-chrome", "curl-impersonate"];

pub struct CliTransport {
    binary: String,
    /// Wrapper scripts already apply the profile; the bare binary does not.
    needs_profile_flags: bool,
    proxy: Option<String>,
    timeout: Duration,
}

impl CliTransport {
    pub fn new(
        config: &TransportConfig,
        proxy: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let binary = match &config.cli_binary {
            Some(explicit) => explicit.clone(),
            None => find_binary().ok_or_else(|| {
                TransportError::Unavailable(format!(
                    "no impersonating curl binary on PATH (tried {})",
                    BINARY_CANDIDATES.join(", ")
                ))
            })?,
        };
        let needs_profile_flags = !binary_is_wrapper(&binary);
        Ok(Self {
            binary,
            needs_profile_flags,
            proxy,
            timeout,
        })
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn build_args(&self, url: &str, headers: &[(String, String)]) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-sS".into(),
            "--no-buffer".into(),
            "-D".into(),
            "-".into(),
            "-o".into(),
            "-".into(),
            "--max-time".into(),
            self.timeout.as_secs().to_string(),
            "--compressed".into(),
        ];

        if self.needs_profile_flags {
            args.extend([
                "--ciphers".into(),
                CHROME_CIPHERS.into(),
                "--curves".into(),
                CHROME_CURVES.into(),
                "--http2".into(),
                "--http2-settings".into(),
                CHROME_H2_SETTINGS.into(),
                "--http2-window-update".into(),
                CHROME_H2_WINDOW_UPDATE.to_string(),
                "--http2-stream-weight".into(),
                CHROME_H2_STREAM_WEIGHT.to_string(),
                "--http2-stream-exclusive".into(),
                "1".into(),
                "--alps".into(),
                "--alps-use-new-codepoint".into(),
                "--cert-compression".into(),
                "brotli".into(),
                "--tls-grease".into(),
                "--tls-signed-cert-timestamps".into(),
                "--ech".into(),
                "grease".into(),
            ]);
        }

        if let Some(proxy) = &self.proxy {
            args.extend(["-x".into(), proxy.clone()]);
        }

        for (name, value) in headers {
            args.extend(["-H".into(), format!("{name}: {value}")]);
        }

        args.push(url.to_string());
        args
    }

    async fn spawn(&self, args: &[String], body: Option<&str>) -> Result<Child> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if body.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::message(format!("failed to spawn {}: {e}", self.binary))
        })?;

        if let Some(body) = body {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| TransportError::message("child stdin unavailable"))?;
            use tokio::io::AsyncWriteExt;
            stdin.write_all(body.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok(child)
    }

    /// Run a request to completion, returning status and buffered body.
    async fn run_buffered(
        &self,
        method_args: &[&str],
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut args: Vec<String> = method_args.iter().map(|a| (*a).to_string()).collect();
        args.extend(self.build_args(url, headers));

        let child = self.spawn(&args, body).await?;
        let output = child.wait_with_output().await?;
        if output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::message(format!(
                "curl failed: {}",
                stderr.trim()
            )));
        }

        let (head, body_bytes) = split_final_head(&output.stdout)?;
        Ok(HttpResponse {
            status: head.status,
            body: String::from_utf8_lossy(&body_bytes).into_owned(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for CliTransport {
    async fn stream_post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse> {
        let mut args: Vec<String> =
            ["--data-binary", "@-", "-X", "POST"].iter().map(|a| (*a).to_string()).collect();
        args.extend(self.build_args(url, headers));

        let mut child = self.spawn(&args, Some(&body)).await?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::message("child stdout unavailable"))?;

        // The head must arrive promptly even when the body then streams for
        // minutes.
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let head = tokio::time::timeout(HEADER_TIMEOUT, async {
            loop {
                if let Some((end, body_start)) = wire::find_block_end(&buf) {
                    let text = String::from_utf8_lossy(&buf[..end]).into_owned();
                    let lines: Vec<&str> = text.lines().collect();
                    let head = wire::parse_head(&lines)?;
                    let _ = buf.split_to(body_start);
                    // Interim 1xx blocks are followed by the real head.
                    if head.status / 100 == 1 {
                        continue;
                    }
                    return Ok::<_, TransportError>(head);
                }
                let read = stdout.read_buf(&mut buf).await?;
                if read == 0 {
                    let stderr = read_stderr(&mut child).await;
                    return Err(TransportError::message(format!(
                        "curl exited before headers: {stderr}"
                    )));
                }
            }
        })
        .await
        .map_err(|_| {
            // Past the deadline the child is useless; reap it.
            let _ = child.start_kill();
            TransportError::HeaderTimeout(HEADER_TIMEOUT)
        })??;

        debug!(status = head.status, "upstream headers received");

        let leftover = buf.freeze();
        let stream = async_stream::stream! {
            let mut child = child;
            let mut stdout = stdout;
            if !leftover.is_empty() {
                yield Ok(leftover);
            }
            let mut chunk = BytesMut::with_capacity(16 * 1024);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            warn!(error = %e, "failed to kill curl child");
                        }
                        yield Err(TransportError::Cancelled);
                        break;
                    },
                    read = stdout.read_buf(&mut chunk) => {
                        match read {
                            Ok(0) => break,
                            Ok(_) => yield Ok(chunk.split().freeze()),
                            Err(e) => {
                                yield Err(TransportError::Io(e));
                                break;
                            },
                        }
                    },
                }
            }
            // Reap the child so it never outlives the stream.
            let _ = child.wait().await;
        };

        Ok(StreamingResponse {
            status: head.status,
            headers: head.headers,
            set_cookies: head.set_cookies,
            body: Box::pin(stream),
        })
    }

    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.run_buffered(&[], url, headers, None).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse> {
        self.run_buffered(&["--data-binary", "@-", "-X", "POST"], url, headers, Some(&body))
            .await
    }

    fn is_impersonate(&self) -> bool {
        true
    }
}

/// Skip interim 1xx blocks and return the final head plus body bytes.
fn split_final_head(stdout: &[u8]) -> Result<(wire::ResponseHead, Vec<u8>)> {
    let mut rest = stdout;
    loop {
        let (end, body_start) = wire::find_block_end(rest)
            .ok_or_else(|| TransportError::message("no header block in curl output"))?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        let lines: Vec<&str> = text.lines().collect();
        let head = wire::parse_head(&lines)?;
        rest = &rest[body_start..];
        if head.status / 100 != 1 {
            return Ok((head, rest.to_vec()));
        }
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return "unknown error".into();
    };
    let mut out = String::new();
    let _ = stderr.read_to_string(&mut out).await;
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "unknown error".into()
    } else {
        trimmed.to_string()
    }
}

fn binary_is_wrapper(binary: &str) -> bool {
    std::path::Path::new(binary)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("curl_"))
}

fn find_binary() -> Option<String> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for candidate in BINARY_CANDIDATES {
            let full = dir.join(candidate);
            if full.is_file() {
                return Some(full.to_string_lossy().into_owned());
            }
        }
    }
    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;

    fn sh_transport(script: &str, dir: &std::path::Path) -> CliTransport {
        // A tiny stand-in "curl" that prints a canned response; lets the
        // spawn/parse/stream plumbing run without the real fork installed.
        let path = dir.join("fake-curl");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let config = TransportConfig {
            cli_binary: Some(path.to_string_lossy().into_owned()),
            ..TransportConfig::default()
        };
        CliTransport::new(&config, None, Duration::from_secs(30)).unwrap()
    }

    #[tokio::test]
    async fn stream_post_parses_head_and_streams_body() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport(
            "printf 'HTTP/2 200\\r\\ncontent-type: text/event-stream\\r\\nset-cookie: __cf_bm=x; Max-Age=1800\\r\\n\\r\\n'; printf 'data: one\\n\\ndata: two\\n\\n'",
            dir.path(),
        );

        let resp = t
            .stream_post("https://upstream.test/x", &[], "{}".into(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("content-type"), Some("text/event-stream"));
        assert_eq!(resp.set_cookies, vec!["__cf_bm=x; Max-Age=1800".to_string()]);

        let mut collected = Vec::new();
        let mut body = resp.body;
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(
            String::from_utf8(collected).unwrap(),
            "data: one\n\ndata: two\n\n"
        );
    }

    #[tokio::test]
    async fn get_collects_status_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport(
            "printf 'HTTP/1.1 404 Not Found\\r\\ncontent-type: application/json\\r\\n\\r\\n{\"detail\":\"nope\"}'",
            dir.path(),
        );
        let resp = t.get("https://upstream.test/x", &[]).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, "{\"detail\":\"nope\"}");
    }

    #[tokio::test]
    async fn interim_100_block_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport(
            "printf 'HTTP/1.1 100 Continue\\r\\n\\r\\nHTTP/2 200\\r\\nx: y\\r\\n\\r\\nok'",
            dir.path(),
        );
        let resp = t.get("https://upstream.test/x", &[]).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
    }

    #[tokio::test]
    async fn early_exit_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport("echo 'SSL peer rejected' >&2; exit 35", dir.path());
        let err = t
            .stream_post("https://upstream.test/x", &[], "{}".into(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSL peer rejected"), "{err}");
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport(
            "printf 'HTTP/2 200\\r\\n\\r\\n'; printf 'first'; sleep 30; printf 'never'",
            dir.path(),
        );
        let cancel = CancellationToken::new();
        let resp = t
            .stream_post("https://upstream.test/x", &[], "{}".into(), cancel.clone())
            .await
            .unwrap();

        let mut body = resp.body;
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"first");

        cancel.cancel();
        let next = body.next().await.unwrap();
        assert!(matches!(next, Err(TransportError::Cancelled)));
    }

    #[test]
    fn wrapper_detection() {
        assert!(binary_is_wrapper("/usr/local/bin/curl_chrome136"));
        assert!(!binary_is_wrapper("/usr/local/bin/curl-impersonate"));
    }

    #[test]
    fn profile_flags_only_for_bare_binary() {
        let dir = tempfile::tempdir().unwrap();
        let t = sh_transport("true", dir.path());
        // fake-curl is not a wrapper name, so the profile flags are included.
        let args = t.build_args("https://u.test", &[]);
        assert!(args.iter().any(|a| a == "--http2-settings"));
        assert!(args.iter().any(|a| a == CHROME_H2_SETTINGS));
    }
}
