//! Desktop context prompt.
//!
//! The desktop client prepends a markdown prompt (harvested from the client
//! install) to every `instructions` payload. Loaded from disk once per
//! process; a compact built-in stands in when no harvest is available.

use std::{path::Path, sync::OnceLock};

use tracing::{debug, warn};

const FALLBACK: &str = "You are Codex, a coding and general assistant running \
inside the ChatGPT desktop app. Answer directly and keep formatting simple \
unless the user asks otherwise.";

static PROMPT: OnceLock<String> = OnceLock::new();

/// Load the prompt from `path` (once). Missing or unreadable files fall back
/// to the built-in prompt.
pub fn init_from(path: Option<&Path>) {
    let prompt = match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => {
                debug!(path = %path.display(), "desktop context prompt loaded");
                raw.trim_end().to_string()
            },
            Ok(_) => {
                warn!(path = %path.display(), "context prompt file empty, using built-in");
                FALLBACK.to_string()
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "context prompt unreadable, using built-in");
                FALLBACK.to_string()
            },
        },
        None => FALLBACK.to_string(),
    };
    let _ = PROMPT.set(prompt);
}

/// The cached prompt. Initializes with the built-in when [`init_from`] was
/// never called.
pub fn get() -> &'static str {
    PROMPT.get_or_init(|| FALLBACK.to_string())
}

/// Compose `instructions`: the context prompt, then any system text.
pub fn instructions_with(system_text: &str) -> String {
    let system_text = system_text.trim();
    if system_text.is_empty() {
        get().to_string()
    } else {
        format!("{}\n\n{system_text}", get())
    }
}
