//! Wire types for the Responses protocol.

use serde::{Deserialize, Serialize};

use crate::sse::SseFrame;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn in the ordered `input` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputItem {
    pub role: Role,
    pub content: String,
}

impl InputItem {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reasoning {
    pub effort: String,
}

/// Request body for `POST /codex/responses`.
///
/// `stream` and `store` are fixed by the upstream contract: responses are
/// always streamed, never stored server-side beyond the hidden reasoning
/// state addressed by `previous_response_id`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputItem>,
    pub stream: bool,
    pub store: bool,
    pub tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl ResponsesRequest {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>, input: Vec<InputItem>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            input,
            stream: true,
            store: false,
            tools: Vec::new(),
            reasoning: None,
            previous_response_id: None,
        }
    }
}

/// Token usage reported on `response.completed`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The upstream events the gateway reacts to. Everything else is `Other` and
/// ignored by the translators.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Created { response_id: Option<String> },
    InProgress { response_id: Option<String> },
    OutputTextDelta { delta: String },
    OutputTextDone,
    Completed {
        response_id: Option<String>,
        usage: Option<TokenUsage>,
    },
    Other,
}

impl ResponseEvent {
    /// Classify a parsed SSE frame. The event name comes from the `event:`
    /// line when present, otherwise from the payload's `type` field.
    pub fn classify(frame: &SseFrame) -> Self {
        let kind = frame
            .event
            .as_deref()
            .or_else(|| frame.data.get("type").and_then(|t| t.as_str()))
            .unwrap_or_default();

        match kind {
            "response.created" => Self::Created {
                response_id: response_id_of(&frame.data),
            },
            "response.in_progress" => Self::InProgress {
                response_id: response_id_of(&frame.data),
            },
            "response.output_text.delta" => Self::OutputTextDelta {
                delta: frame
                    .data
                    .get("delta")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "response.output_text.done" => Self::OutputTextDone,
            "response.completed" => Self::Completed {
                response_id: response_id_of(&frame.data),
                usage: frame
                    .data
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .and_then(|u| serde_json::from_value(u.clone()).ok()),
            },
            _ => Self::Other,
        }
    }
}

fn response_id_of(data: &serde_json::Value) -> Option<String> {
    data.get("response")
        .and_then(|r| r.get("id"))
        .and_then(|id| id.as_str())
        .map(ToString::to_string)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Option<&str>, data: serde_json::Value) -> SseFrame {
        SseFrame {
            event: event.map(ToString::to_string),
            data,
        }
    }

    #[test]
    fn request_serializes_fixed_fields() {
        let req = ResponsesRequest::new("gpt-5-codex", "be helpful", vec![InputItem::new(
            Role::User,
            "Hi",
        )]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["store"], false);
        assert_eq!(json["tools"], serde_json::json!([]));
        assert_eq!(json["input"][0]["role"], "user");
        assert!(json.get("reasoning").is_none());
        assert!(json.get("previous_response_id").is_none());
    }

    #[test]
    fn classify_created_and_completed() {
        let created = ResponseEvent::classify(&frame(
            Some("response.created"),
            serde_json::json!({"response": {"id": "r1"}}),
        ));
        assert_eq!(created, ResponseEvent::Created {
            response_id: Some("r1".into())
        });

        let completed = ResponseEvent::classify(&frame(
            Some("response.completed"),
            serde_json::json!({"response": {"id": "r1", "usage": {"input_tokens": 5, "output_tokens": 1}}}),
        ));
        assert_eq!(completed, ResponseEvent::Completed {
            response_id: Some("r1".into()),
            usage: Some(TokenUsage {
                input_tokens: 5,
                output_tokens: 1
            }),
        });
    }

    #[test]
    fn classify_falls_back_to_payload_type() {
        let event = ResponseEvent::classify(&frame(
            None,
            serde_json::json!({"type": "response.output_text.delta", "delta": "Hi!"}),
        ));
        assert_eq!(event, ResponseEvent::OutputTextDelta {
            delta: "Hi!".into()
        });
    }

    #[test]
    fn unknown_events_are_other() {
        let event = ResponseEvent::classify(&frame(
            Some("response.reasoning_summary.delta"),
            serde_json::json!({}),
        ));
        assert_eq!(event, ResponseEvent::Other);
    }

    #[test]
    fn completed_without_id_is_allowed() {
        let event = ResponseEvent::classify(&frame(
            Some("response.completed"),
            serde_json::json!({"response": {}}),
        ));
        assert_eq!(event, ResponseEvent::Completed {
            response_id: None,
            usage: None
        });
    }
}
