//! Readable text markers for non-text content blocks.
//!
//! The upstream only takes plain strings in `input`, so tool calls, tool
//! results and media collapse into bracketed markers the model can still
//! reason about.

pub fn tool_call(name: &str, args: &serde_json::Value) -> String {
    let args = if args.is_null() {
        String::new()
    } else {
        serde_json::to_string(args).unwrap_or_default()
    };
    format!("[Tool Call: {name}({args})]")
}

pub fn tool_result(id: &str, content: &str) -> String {
    format!("[Tool Result ({id})]: {content}")
}

pub fn image() -> String {
    "[Image]".to_string()
}

pub fn unknown(kind: &str) -> String {
    format!("[{kind}]")
}

/// Join flattened pieces the way multi-block messages read: one block per
/// line, blank pieces dropped.
pub fn join_blocks(pieces: Vec<String>) -> String {
    pieces
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
