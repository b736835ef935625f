//! Inbound message shapes from the agent runtime.
//!
//! Messages arrive as newline-delimited JSON, discriminated by a `type`
//! field. Anything unrecognized becomes [`RuntimeMessage::Unknown`] so a
//! newer runtime never wedges the gateway; the translator trace-logs those
//! and continues.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Content blocks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Thinking {
        thinking: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

// ─── Completion ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

impl Usage {
    /// Tokens occupying the context window after this turn.
    pub fn context_used(&self) -> u64 {
        self.input_tokens
            + self.cache_read_input_tokens
            + self.cache_creation_input_tokens
            + self.output_tokens
    }
}

/// Terminal `result` message of a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnResult {
    pub result: Option<String>,
    pub usage: Usage,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub is_error: bool,
}

// ─── RuntimeMessage ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RuntimeMessage {
    /// `system`/`init` handshake; carries nothing the gateway needs.
    Init,
    Assistant(AssistantMessage),
    Completion(TurnResult),
    /// Anything else the runtime sent.
    Unknown(Value),
}

impl RuntimeMessage {
    /// Parse one wire message, never failing: unrecognized or malformed
    /// shapes degrade to [`RuntimeMessage::Unknown`].
    pub fn parse(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "system" => {
                if value.get("subtype").and_then(Value::as_str) == Some("init") {
                    RuntimeMessage::Init
                } else {
                    RuntimeMessage::Unknown(value)
                }
            }
            "assistant" | "user" => {
                // Tool results ride on `user`-typed envelopes in stream
                // mode; both carry the same content-array shape.
                let content = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .or_else(|| value.get("content"));
                match content {
                    Some(Value::Array(items)) => {
                        let blocks = items
                            .iter()
                            .filter_map(|item| {
                                serde_json::from_value::<ContentBlock>(item.clone()).ok()
                            })
                            .collect();
                        RuntimeMessage::Assistant(AssistantMessage { content: blocks })
                    }
                    _ => RuntimeMessage::Unknown(value),
                }
            }
            "result" => match serde_json::from_value::<TurnResult>(value.clone()) {
                Ok(mut result) => {
                    if value.get("subtype").and_then(Value::as_str) == Some("error") {
                        result.is_error = true;
                    }
                    RuntimeMessage::Completion(result)
                }
                Err(_) => RuntimeMessage::Unknown(value),
            },
            _ => RuntimeMessage::Unknown(value),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Assistant(_) => "assistant",
            Self::Completion(_) => "result",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_init() {
        let msg = RuntimeMessage::parse(json!({"type": "system", "subtype": "init"}));
        assert!(matches!(msg, RuntimeMessage::Init));
    }

    #[test]
    fn parses_assistant_blocks_in_order() {
        let msg = RuntimeMessage::parse(json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "hello"},
                {"type": "tool_use", "id": "t1", "name": "Glob", "input": {"pattern": "*.rs"}},
            ]}
        }));
        let RuntimeMessage::Assistant(m) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(m.content.len(), 2);
        assert!(matches!(&m.content[0], ContentBlock::Text { text } if text == "hello"));
        assert!(matches!(&m.content[1], ContentBlock::ToolUse { name, .. } if name == "Glob"));
    }

    #[test]
    fn tool_result_on_user_envelope() {
        let msg = RuntimeMessage::parse(json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "done", "is_error": false},
            ]}
        }));
        let RuntimeMessage::Assistant(m) = msg else {
            panic!("expected assistant-shaped message");
        };
        assert!(matches!(&m.content[0], ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t1"));
    }

    #[test]
    fn unknown_block_types_are_skipped() {
        let msg = RuntimeMessage::parse(json!({
            "type": "assistant",
            "content": [
                {"type": "hologram", "data": 1},
                {"type": "text", "text": "kept"},
            ]
        }));
        let RuntimeMessage::Assistant(m) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(m.content.len(), 1);
    }

    #[test]
    fn parses_success_result() {
        let msg = RuntimeMessage::parse(json!({
            "type": "result",
            "subtype": "success",
            "usage": {"input_tokens": 100, "output_tokens": 20},
            "total_cost_usd": 0.01,
            "duration_ms": 1500,
            "num_turns": 2,
            "is_error": false,
        }));
        let RuntimeMessage::Completion(r) = msg else {
            panic!("expected completion");
        };
        assert_eq!(r.usage.input_tokens, 100);
        assert_eq!(r.num_turns, 2);
        assert!(!r.is_error);
    }

    #[test]
    fn error_subtype_forces_is_error() {
        let msg = RuntimeMessage::parse(json!({
            "type": "result",
            "subtype": "error",
        }));
        let RuntimeMessage::Completion(r) = msg else {
            panic!("expected completion");
        };
        assert!(r.is_error);
    }

    #[test]
    fn garbage_becomes_unknown() {
        let msg = RuntimeMessage::parse(json!({"type": "telemetry", "x": 1}));
        assert!(matches!(msg, RuntimeMessage::Unknown(_)));
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn context_used_sums_all_token_classes() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_input_tokens: 100,
            cache_creation_input_tokens: 7,
        };
        assert_eq!(usage.context_used(), 122);
    }
}
