//! HTTP/1-style header block parsing shared by both transport backends.
//!
//! curl emits the response head as text regardless of the negotiated HTTP
//! version (`HTTP/2 200` has no reason phrase), so one parser covers both.

use crate::{Result, TransportError};

/// A parsed response head.
#[derive(Debug, Default, Clone)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub set_cookies: Vec<String>,
}

/// Parse `HTTP/2 200` or `HTTP/1.1 200 OK` into a status code.
pub(crate) fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| TransportError::message("empty status line"))?;
    if !version.starts_with("HTTP/") {
        return Err(TransportError::message(format!(
            "malformed status line: {line}"
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| TransportError::message(format!("malformed status line: {line}")))
}

/// Parse a full header block (status line first, terminator already
/// stripped). `Set-Cookie` lines are collected separately with their
/// attributes intact, and also kept in the plain header list.
pub(crate) fn parse_head(lines: &[&str]) -> Result<ResponseHead> {
    let mut iter = lines.iter();
    let status = parse_status_line(
        iter.next()
            .ok_or_else(|| TransportError::message("empty response head"))?,
    )?;

    let mut head = ResponseHead {
        status,
        ..ResponseHead::default()
    };
    for line in iter {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("set-cookie") {
            head.set_cookies.push(value.to_string());
        }
        head.headers.push((name.to_string(), value.to_string()));
    }
    Ok(head)
}

/// Locate the end of a header block (`\r\n\r\n`, tolerating bare `\n\n`).
/// Returns `(head_end, body_start)` byte offsets.
pub(crate) fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    find_subslice(buf, b"\n\n").map(|pos| (pos, pos + 2))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http2_status_line() {
        assert_eq!(parse_status_line("HTTP/2 200").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.1 429 Too Many Requests").unwrap(), 429);
        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn parses_head_with_cookies() {
        let lines = vec![
            "HTTP/2 200",
            "content-type: text/event-stream",
            "set-cookie: __cf_bm=abc; Max-Age=1800; Path=/",
            "set-cookie: cf_clearance=xyz; Expires=Wed, 21 Oct 2026 07:28:00 GMT",
        ];
        let head = parse_head(&lines).unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.set_cookies.len(), 2);
        assert!(head.set_cookies[0].starts_with("__cf_bm=abc"));
        assert_eq!(head.headers.len(), 3);
    }

    #[test]
    fn finds_block_end_crlf_and_lf() {
        assert_eq!(find_block_end(b"HTTP/2 200\r\nA: b\r\n\r\nbody"), Some((16, 20)));
        assert_eq!(find_block_end(b"HTTP/2 200\nA: b\n\nbody"), Some((15, 17)));
        assert_eq!(find_block_end(b"HTTP/2 200\r\nA: b\r\n"), None);
    }
}
