//! Incremental server-sent-event parsing.
//!
//! Chunks arrive on arbitrary boundaries; the parser accumulates into a
//! bounded buffer, splits on blank-line event terminators, and yields one
//! frame per complete event. A literal `[DONE]` payload ends the stream.

use tracing::trace;

/// Hard cap on the accumulation buffer. A single event larger than this is
/// not something the upstream produces; treat it as a protocol error.
const MAX_BUFFER: usize = 10 * 1024 * 1024;

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// The `event:` field, when the upstream names the event.
    pub event: Option<String>,
    /// Concatenated `data:` lines, parsed as JSON.
    pub data: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: String,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk, returning every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, String> {
        if self.done {
            return Ok(Vec::new());
        }
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        if self.buf.len() > MAX_BUFFER {
            return Err(format!("SSE buffer exceeded {MAX_BUFFER} bytes"));
        }

        let mut frames = Vec::new();
        while let Some(terminator) = find_event_end(&self.buf) {
            let event_text: String = self.buf.drain(..terminator.0).collect();
            self.buf.drain(..terminator.1 - terminator.0);

            if let Some(frame) = parse_event(&event_text) {
                match frame {
                    ParsedEvent::Done => {
                        self.done = true;
                        trace!("SSE stream done");
                        return Ok(frames);
                    },
                    ParsedEvent::Frame(frame) => frames.push(frame),
                }
            }
        }
        Ok(frames)
    }
}

enum ParsedEvent {
    Frame(SseFrame),
    Done,
}

/// End of the next complete event: `(event_end, resume_at)`.
fn find_event_end(buf: &str) -> Option<(usize, usize)> {
    let crlf = buf.find("\r\n\r\n");
    let lf = buf.find("\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if c < l => Some((c, c + 4)),
        (_, Some(l)) => Some((l, l + 2)),
        (Some(c), None) => Some((c, c + 4)),
        (None, None) => None,
    }
}

fn parse_event(text: &str) -> Option<ParsedEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comment lines (`:`) and unknown fields are ignored.
    }

    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return Some(ParsedEvent::Done);
    }

    match serde_json::from_str(&data) {
        Ok(json) => Some(ParsedEvent::Frame(SseFrame {
            event,
            data: json,
        })),
        Err(e) => {
            trace!(error = %e, "skipping non-JSON SSE payload");
            None
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_events() {
        let mut parser = SseParser::new();
        let frames = parser
            .push(b"event: response.created\ndata: {\"response\":{\"id\":\"r1\"}}\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("response.created"));
        assert_eq!(frames[0].data["response"]["id"], "r1");
    }

    #[test]
    fn handles_chunks_split_mid_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: response.output_text.delta\nda").unwrap().is_empty());
        let frames = parser.push(b"ta: {\"delta\":\"Hi\"}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data["delta"], "Hi");
    }

    #[test]
    fn crlf_terminators_work() {
        let mut parser = SseParser::new();
        let frames = parser
            .push(b"event: x\r\ndata: {\"a\":1}\r\n\r\ndata: {\"b\":2}\r\n\r\n")
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data["a"], 1);
        assert_eq!(frames[1].data["b"], 2);
    }

    #[test]
    fn multiple_data_lines_concatenate_with_newlines() {
        let mut parser = SseParser::new();
        // JSON string split across two data lines is rejoined before parsing.
        let frames = parser.push(b"data: {\"a\":\ndata: 1}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data["a"], 1);
    }

    #[test]
    fn done_sentinel_stops_the_stream() {
        let mut parser = SseParser::new();
        let frames = parser
            .push(b"data: {\"a\":1}\n\ndata: [DONE]\n\ndata: {\"never\":true}\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert!(parser.is_done());
        assert!(parser.push(b"data: {\"b\":2}\n\n").unwrap().is_empty());
    }

    #[test]
    fn non_json_payloads_are_skipped() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: not json\n\ndata: {\"ok\":1}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data["ok"], 1);
    }

    #[test]
    fn buffer_cap_is_enforced() {
        let mut parser = SseParser::new();
        let big = vec![b'x'; MAX_BUFFER + 1];
        assert!(parser.push(&big).is_err());
    }
}
