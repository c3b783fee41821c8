//! Gemini generateContent compatibility.

use serde::Deserialize;

use courier_upstream::{InputItem, Reasoning, ResponsesRequest, Role, TokenUsage};

use crate::{TranslateOptions, TranslatedRequest, catalog, context, flatten};

// ── Request schema ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(default)]
    pub system_instruction: Option<Content>,
    #[serde(default)]
    pub generation_config: Option<GenerationConfig>,
    /// Accepted for schema compatibility, validated, then discarded.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
    #[serde(default)]
    pub function_response: Option<FunctionResponse>,
    #[serde(default)]
    pub inline_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default)]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(default)]
    pub thinking_budget: Option<i64>,
}

// ── Request translation ─────────────────────────────────────────────────────

/// Translate a generateContent request. The model id comes from the URL
/// path, not the body, so it is passed in.
pub fn translate(
    model_from_path: &str,
    req: &GenerateContentRequest,
    stream: bool,
    opts: &TranslateOptions,
) -> Result<TranslatedRequest, String> {
    if req.contents.is_empty() {
        return Err("contents must not be empty".into());
    }
    if let Some(tools) = &req.tools
        && !tools.is_array()
    {
        return Err("tools must be an array".into());
    }

    let system_text = req
        .system_instruction
        .as_ref()
        .map(content_text)
        .unwrap_or_default();

    let mut input: Vec<InputItem> = Vec::new();
    for content in &req.contents {
        let role = match content.role.as_deref() {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };
        input.push(InputItem::new(role, content_text(content)));
    }

    let model = catalog::resolve(Some(model_from_path), &opts.default_model);
    let budget_hint = req
        .generation_config
        .as_ref()
        .and_then(|g| g.thinking_config.as_ref())
        .and_then(|t| t.thinking_budget);
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
        stream,
        messages_for_hash,
    })
}

fn content_text(content: &Content) -> String {
    let pieces = content
        .parts
        .iter()
        .map(|part| {
            if let Some(text) = &part.text {
                text.clone()
            } else if let Some(call) = &part.function_call {
                flatten::tool_call(&call.name, &call.args)
            } else if let Some(resp) = &part.function_response {
                flatten::tool_result(
                    &resp.name,
                    &resp
                        .response
                        .get("content")
                        .and_then(|c| c.as_str())
                        .map(ToString::to_string)
                        .unwrap_or_else(|| resp.response.to_string()),
                )
            } else if part.inline_data.is_some() {
                flatten::image()
            } else {
                String::new()
            }
        })
        .collect();
    flatten::join_blocks(pieces)
}

// ── Response encoding ───────────────────────────────────────────────────────

fn candidate(text: &str, finish_reason: Option<&str>) -> serde_json::Value {
    let mut c = serde_json::json!({
        "content": {"parts": [{"text": text}], "role": "model"},
        "index": 0,
    });
    if let Some(reason) = finish_reason
        && let Some(obj) = c.as_object_mut()
    {
        obj.insert("finishReason".into(), serde_json::json!(reason));
    }
    c
}

fn usage_metadata(usage: TokenUsage) -> serde_json::Value {
    serde_json::json!({
        "promptTokenCount": usage.input_tokens,
        "candidatesTokenCount": usage.output_tokens,
        "totalTokenCount": usage.total(),
    })
}

/// Streaming encoder: one `GenerateContentResponse` JSON per `data:` line,
/// frames separated by blank CRLF pairs.
pub struct StreamEncoder {
    model: String,
}

impl StreamEncoder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    fn frame(&self, payload: serde_json::Value) -> String {
        format!("data: {payload}\r\n\r\n")
    }

    pub fn delta(&self, text: &str) -> String {
        self.frame(serde_json::json!({
            "candidates": [candidate(text, None)],
            "modelVersion": self.model,
        }))
    }

    pub fn finish(&self, usage: TokenUsage) -> String {
        self.frame(serde_json::json!({
            "candidates": [candidate("", Some("STOP"))],
            "usageMetadata": usage_metadata(usage),
            "modelVersion": self.model,
        }))
    }
}

/// Non-streaming response: the same shape as a single object.
pub fn generate_content_response(model: &str, text: &str, usage: TokenUsage) -> serde_json::Value {
    serde_json::json!({
        "candidates": [candidate(text, Some("STOP"))],
        "usageMetadata": usage_metadata(usage),
        "modelVersion": model,
    })
}

/// Model listing for `GET /v1beta/models`.
pub fn models_response() -> serde_json::Value {
    let models: Vec<serde_json::Value> = catalog::CATALOG
        .iter()
        .map(|m| {
            serde_json::json!({
                "name": format!("models/{}", m.id),
                "displayName": m.display_name,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    serde_json::json!({"models": models})
}
