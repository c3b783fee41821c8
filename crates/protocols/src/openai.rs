//! OpenAI chat-completions compatibility.

use serde::Deserialize;

use courier_upstream::{InputItem, Reasoning, ResponsesRequest, Role, TokenUsage};

use crate::{
    TranslateOptions, TranslatedRequest, catalog, context, flatten, now_unix, random_hex,
};

// ── Request schema ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    /// Accepted for schema compatibility, validated, then discarded.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallStub>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// String or array-of-parts, as the wire allows both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallStub {
    #[serde(default)]
    pub function: Option<ToolFunctionStub>,
}

#[derive(Debug, Deserialize)]
pub struct ToolFunctionStub {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ── Request translation ─────────────────────────────────────────────────────

/// Translate a chat-completions request into the upstream shape.
///
/// System messages concatenate into `instructions` (behind the desktop
/// context prompt); everything else becomes the ordered `input` array.
pub fn translate(
    req: &ChatCompletionRequest,
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

    let mut system_texts: Vec<String> = Vec::new();
    let mut input: Vec<InputItem> = Vec::new();

    for message in &req.messages {
        let text = message_text(message);
        match message.role.as_str() {
            "system" | "developer" => {
                if !text.is_empty() {
                    system_texts.push(text);
                }
            },
            "assistant" => input.push(InputItem::new(Role::Assistant, text)),
            "tool" => {
                let id = message.tool_call_id.as_deref().unwrap_or("unknown");
                input.push(InputItem::new(Role::User, flatten::tool_result(id, &text)));
            },
            _ => input.push(InputItem::new(Role::User, text)),
        }
    }

    if input.is_empty() {
        return Err("at least one non-system message is required".into());
    }

    let model = catalog::resolve(req.model.as_deref(), &opts.default_model);
    let effort = catalog::select_effort(None, &model, opts.default_effort);

    let messages_for_hash = input
        .iter()
        .map(|item| (role_str(item.role).to_string(), item.content.clone()))
        .collect();

    let mut request =
        ResponsesRequest::new(model, context::instructions_with(&system_texts.join("\n\n")), input);
    request.reasoning = Some(Reasoning {
        effort: effort.as_str().to_string(),
    });

    Ok(TranslatedRequest {
        request,
        stream: req.stream,
        messages_for_hash,
    })
}

fn message_text(message: &ChatMessage) -> String {
    let mut pieces: Vec<String> = Vec::new();

    match &message.content {
        Some(MessageContent::Text(text)) => pieces.push(text.clone()),
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part.kind.as_str() {
                    "text" => pieces.push(part.text.clone().unwrap_or_default()),
                    "image_url" => pieces.push(flatten::image()),
                    other => pieces.push(flatten::unknown(other)),
                }
            }
        },
        None => {},
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            if let Some(function) = &call.function {
                let name = function.name.as_deref().unwrap_or("unknown");
                let args: serde_json::Value = function
                    .arguments
                    .as_deref()
                    .and_then(|a| serde_json::from_str(a).ok())
                    .unwrap_or(serde_json::Value::Null);
                pieces.push(flatten::tool_call(name, &args));
            }
        }
    }

    flatten::join_blocks(pieces)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

// ── Response encoding ───────────────────────────────────────────────────────

/// Streaming encoder for `chat.completion.chunk` SSE.
pub struct StreamEncoder {
    id: String,
    model: String,
    created: u64,
    role_sent: bool,
}

impl StreamEncoder {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", random_hex(12)),
            model: model.to_string(),
            created: now_unix(),
            role_sent: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn chunk(&self, delta: serde_json::Value, finish_reason: Option<&str>) -> String {
        let payload = serde_json::json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        format!("data: {payload}\n\n")
    }

    /// The opening chunk carrying `delta.role`.
    pub fn start(&mut self) -> String {
        self.role_sent = true;
        self.chunk(serde_json::json!({"role": "assistant"}), None)
    }

    /// One incremental text delta. Emits the role chunk first if the caller
    /// never did.
    pub fn delta(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if !self.role_sent {
            out.push(self.start());
        }
        out.push(self.chunk(serde_json::json!({"content": text}), None));
        out
    }

    /// Final chunk plus the `[DONE]` terminator.
    pub fn finish(&self) -> Vec<String> {
        vec![
            self.chunk(serde_json::json!({}), Some("stop")),
            "data: [DONE]\n\n".to_string(),
        ]
    }
}

/// Non-streaming `chat.completion` response.
pub fn completion_response(model: &str, text: &str, usage: TokenUsage) -> serde_json::Value {
    serde_json::json!({
        "id": format!("chatcmpl-{}", random_hex(12)),
        "object": "chat.completion",
        "created": now_unix(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.total(),
        },
    })
}

/// Model listing payloads for `GET /v1/models`.
pub fn models_response() -> serde_json::Value {
    let data: Vec<serde_json::Value> = catalog::CATALOG.iter().map(model_object).collect();
    serde_json::json!({"object": "list", "data": data})
}

pub fn model_object(model: &catalog::ModelInfo) -> serde_json::Value {
    serde_json::json!({
        "id": model.id,
        "object": "model",
        "owned_by": "openai",
        "display_name": model.display_name,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use courier_config::ReasoningEffort;

    fn opts() -> TranslateOptions {
        TranslateOptions {
            default_model: "gpt-5-codex".into(),
            default_effort: ReasoningEffort::Medium,
        }
    }

    fn parse(raw: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn basic_request_translates() {
        let req = parse(serde_json::json!({
            "model": "codex",
            "messages": [{"role": "user", "content": "Hi"}]
        }));
        let translated = translate(&req, &opts()).unwrap();

        assert_eq!(translated.request.model, "gpt-5-codex");
        assert!(translated.request.stream);
        assert!(!translated.request.store);
        assert_eq!(translated.request.input, vec![InputItem::new(Role::User, "Hi")]);
        assert!(translated.request.instructions.starts_with(context::get()));
        assert_eq!(
            translated.request.reasoning.as_ref().unwrap().effort,
            "medium"
        );
        assert!(!translated.stream);
    }

    #[test]
    fn system_messages_concatenate_in_order() {
        let req = parse(serde_json::json!({
            "model": "codex",
            "messages": [
                {"role": "system", "content": "First rule."},
                {"role": "user", "content": "Hi"},
                {"role": "system", "content": "Second rule."}
            ]
        }));
        let translated = translate(&req, &opts()).unwrap();
        let instructions = &translated.request.instructions;
        let first = instructions.find("First rule.").unwrap();
        let second = instructions.find("Second rule.").unwrap();
        assert!(first < second);
        // System text never lands in input.
        assert_eq!(translated.request.input.len(), 1);
    }

    #[test]
    fn content_parts_and_tool_blocks_flatten() {
        let req = parse(serde_json::json!({
            "model": "codex",
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look at this"},
                    {"type": "image_url", "image_url": {"url": "http://x/y.png"}}
                ]},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "result text"}
            ]
        }));
        let translated = translate(&req, &opts()).unwrap();
        let input = &translated.request.input;
        assert_eq!(input[0].content, "look at this\n[Image]");
        assert_eq!(input[1].content, "[Tool Call: search({\"q\":\"rust\"})]");
        assert_eq!(input[2].content, "[Tool Result (call_1)]: result text");
        assert_eq!(input[2].role, Role::User);
    }

    #[test]
    fn empty_messages_rejected() {
        let req = parse(serde_json::json!({"model": "codex", "messages": []}));
        assert!(translate(&req, &opts()).is_err());
    }

    #[test]
    fn non_array_tools_rejected() {
        let req = parse(serde_json::json!({
            "model": "codex",
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": "nope"
        }));
        assert!(translate(&req, &opts()).is_err());
    }

    #[test]
    fn tools_are_discarded_not_forwarded() {
        let req = parse(serde_json::json!({
            "model": "codex",
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"type": "function", "function": {"name": "f"}}]
        }));
        let translated = translate(&req, &opts()).unwrap();
        assert!(translated.request.tools.is_empty());
    }

    #[test]
    fn stream_sequence_role_deltas_finish_done() {
        let mut enc = StreamEncoder::new("gpt-5-codex");
        let mut events: Vec<String> = Vec::new();
        events.extend(enc.delta("A"));
        events.extend(enc.delta("B"));
        events.extend(enc.finish());

        // role chunk, A, B, finish, [DONE]
        assert_eq!(events.len(), 5);
        let parse = |s: &str| {
            serde_json::from_str::<serde_json::Value>(
                s.strip_prefix("data: ").unwrap().trim(),
            )
            .unwrap()
        };
        assert_eq!(parse(&events[0])["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(parse(&events[1])["choices"][0]["delta"]["content"], "A");
        assert_eq!(parse(&events[2])["choices"][0]["delta"]["content"], "B");
        assert_eq!(parse(&events[3])["choices"][0]["finish_reason"], "stop");
        assert_eq!(events[4], "data: [DONE]\n\n");

        // All chunks share one id, independent of the upstream's.
        let id = parse(&events[0])["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(parse(&events[3])["id"], id);
    }

    #[test]
    fn completion_response_accumulates_usage() {
        let resp = completion_response("gpt-5-codex", "AB", TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
        });
        assert_eq!(resp["choices"][0]["message"]["content"], "AB");
        assert_eq!(resp["usage"]["prompt_tokens"], 1);
        assert_eq!(resp["usage"]["completion_tokens"], 2);
        assert_eq!(resp["usage"]["total_tokens"], 3);
    }

    #[test]
    fn models_listing_covers_catalog() {
        let resp = models_response();
        let data = resp["data"].as_array().unwrap();
        assert_eq!(data.len(), catalog::CATALOG.len());
        assert!(data.iter().any(|m| m["id"] == "gpt-5-codex"));
    }
}
