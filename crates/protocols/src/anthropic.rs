//! Anthropic messages compatibility.

use serde::Deserialize;

use courier_upstream::{InputItem, Reasoning, ResponsesRequest, Role, TokenUsage};

use crate::{
    TranslateOptions, TranslatedRequest, catalog, context, flatten, random_hex,
};

// ── Request schema ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    pub model: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    /// Top-level system text: a string or an array of text blocks.
    #[serde(default)]
    pub system: Option<SystemField>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub thinking: Option<ThinkingConfig>,
    /// Accepted for schema compatibility, validated, then discarded.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SystemField {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThinkingConfig {
    #[serde(default)]
    pub budget_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    // tool_use
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    // tool_result
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

// ── Request translation ─────────────────────────────────────────────────────

pub fn translate(
    req: &MessagesRequest,
    opts: &TranslateOptions,
) -> Result<TranslatedRequest, String> {
    if req.messages.is_empty() {
        return Err("messages must not be empty".into());
    }
    if let Some(tools) = &req.tools
        && !tools.is_array()
    {
        return Err("tools must be an array".into());
    }

    let system_text = match &req.system {
        Some(SystemField::Text(text)) => text.clone(),
        Some(SystemField::Blocks(blocks)) => flatten::join_blocks(
            blocks
                .iter()
                .map(|b| b.text.clone().unwrap_or_default())
                .collect(),
        ),
        None => String::new(),
    };

    let mut input: Vec<InputItem> = Vec::new();
    for message in &req.messages {
        let role = match message.role.as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        input.push(InputItem::new(role, content_text(&message.content)));
    }

    let model = catalog::resolve(req.model.as_deref(), &opts.default_model);
    let budget_hint = req.thinking.as_ref().and_then(|t| t.budget_tokens);
    let effort = catalog::select_effort(budget_hint, &model, opts.default_effort);

    let messages_for_hash = input
        .iter()
        .map(|item| {
            (
                match item.role {
                    Role::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                item.content.clone(),
            )
        })
        .collect();

    let mut request =
        ResponsesRequest::new(model, context::instructions_with(&system_text), input);
    request.reasoning = Some(Reasoning {
        effort: effort.as_str().to_string(),
    });

    Ok(TranslatedRequest {
        request,
        stream: req.stream,
        messages_for_hash,
    })
}

fn content_text(content: &AnthropicContent) -> String {
    match content {
        AnthropicContent::Text(text) => text.clone(),
        AnthropicContent::Blocks(blocks) => {
            let pieces = blocks
                .iter()
                .map(|block| match block.kind.as_str() {
                    "text" => block.text.clone().unwrap_or_default(),
                    "tool_use" => flatten::tool_call(
                        block.name.as_deref().unwrap_or("unknown"),
                        block.input.as_ref().unwrap_or(&serde_json::Value::Null),
                    ),
                    "tool_result" => flatten::tool_result(
                        block.tool_use_id.as_deref().unwrap_or("unknown"),
                        &tool_result_text(block.content.as_ref()),
                    ),
                    "image" => flatten::image(),
                    other => flatten::unknown(other),
                })
                .collect();
            flatten::join_blocks(pieces)
        },
    }
}

fn tool_result_text(content: Option<&serde_json::Value>) -> String {
    match content {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

// ── Response encoding ───────────────────────────────────────────────────────

/// Streaming encoder for the Anthropic named-event sequence.
pub struct StreamEncoder {
    id: String,
    model: String,
    started: bool,
}

impl StreamEncoder {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("msg_{}", random_hex(12)),
            model: model.to_string(),
            started: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn event(name: &str, payload: serde_json::Value) -> String {
        format!("event: {name}\ndata: {payload}\n\n")
    }

    /// `message_start` then `content_block_start`.
    pub fn start(&mut self, input_tokens: u64) -> Vec<String> {
        self.started = true;
        vec![
            Self::event(
                "message_start",
                serde_json::json!({
                    "type": "message_start",
                    "message": {
                        "id": self.id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": null,
                        "usage": {"input_tokens": input_tokens, "output_tokens": 0},
                    },
                }),
            ),
            Self::event(
                "content_block_start",
                serde_json::json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": {"type": "text", "text": ""},
                }),
            ),
        ]
    }

    pub fn delta(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(3);
        if !self.started {
            out.extend(self.start(0));
        }
        out.push(Self::event(
            "content_block_delta",
            serde_json::json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text},
            }),
        ));
        out
    }

    /// `content_block_stop`, `message_delta`, `message_stop`.
    pub fn finish(&self, usage: TokenUsage) -> Vec<String> {
        vec![
            Self::event(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
            Self::event(
                "message_delta",
                serde_json::json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                    "usage": {"output_tokens": usage.output_tokens},
                }),
            ),
            Self::event(
                "message_stop",
                serde_json::json!({"type": "message_stop"}),
            ),
        ]
    }
}

/// Non-streaming message response.
pub fn message_response(model: &str, text: &str, usage: TokenUsage) -> serde_json::Value {
    serde_json::json!({
        "id": format!("msg_{}", random_hex(12)),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
        },
    })
}
