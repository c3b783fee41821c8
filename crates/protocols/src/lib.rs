//! Request-shape translators between the three compatibility protocols and
//! the upstream Responses protocol, in both directions.

pub mod anthropic;
pub mod catalog;
pub mod context;
pub mod flatten;
pub mod gemini;
pub mod openai;

use courier_upstream::ResponsesRequest;

/// What a request translator hands the pipeline.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub request: ResponsesRequest,
    /// Whether the client asked for a streamed response.
    pub stream: bool,
    /// `(role, content)` pairs used for session prefix hashing.
    pub messages_for_hash: Vec<(String, String)>,
}

/// Defaults applied while translating.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub default_model: String,
    pub default_effort: courier_config::ReasoningEffort,
}

pub(crate) fn random_hex(bytes: usize) -> String {
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(buf.as_mut_slice());
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
