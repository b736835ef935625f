//! Outbound SSE frame types and payload contracts.

use serde_json::{Value, json};

/// Truncation widths for tool input/output summaries shown in the UI.
const INPUT_SUMMARY_LEN: usize = 100;
const OUTPUT_SUMMARY_LEN: usize = 200;

/// One outbound frame: `event: <name>\ndata: <json>\n\n` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    SessionConfig {
        max_turns: u32,
        permission_mode: String,
        sandbox_enabled: bool,
        sandbox_root: String,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    ToolStart {
        tool_id: String,
        name: String,
        input: String,
        iteration: u32,
    },
    ToolResult {
        tool_id: String,
        status: String,
        output: String,
        error: Option<String>,
    },
    AgentSpawn {
        agent_id: String,
        agent_type: String,
        description: String,
        parent_tool_id: Option<String>,
        iteration: u32,
        depth: u32,
    },
    AgentComplete {
        agent_id: String,
    },
    HookPreTool {
        tool_name: String,
        action: String,
        message: String,
    },
    HookPostTool {
        tool_name: String,
        message: String,
    },
    HtmlCreated {
        filename: String,
        url: String,
    },
    CostUpdate {
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        total_cost: f64,
        context_used: u64,
        context_max: u64,
        context_percent: f64,
    },
    MessageComplete {
        tools_used: Vec<String>,
        total_tokens: u64,
        stop_reason: String,
        trace_file: String,
    },
    Error {
        error: String,
        details: String,
        trace_file: Option<String>,
    },
}

impl SseFrame {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionConfig { .. } => "session_config",
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::AgentSpawn { .. } => "agent_spawn",
            Self::AgentComplete { .. } => "agent_complete",
            Self::HookPreTool { .. } => "hook_pre_tool",
            Self::HookPostTool { .. } => "hook_post_tool",
            Self::HtmlCreated { .. } => "html_created",
            Self::CostUpdate { .. } => "cost_update",
            Self::MessageComplete { .. } => "message_complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this frame terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageComplete { .. } | Self::Error { .. })
    }

    /// JSON payload per the frame contract.
    pub fn payload(&self) -> Value {
        match self {
            Self::SessionConfig {
                max_turns,
                permission_mode,
                sandbox_enabled,
                sandbox_root,
            } => json!({
                "max_turns": max_turns,
                "permission_mode": permission_mode,
                "sandbox_enabled": sandbox_enabled,
                "sandbox_root": sandbox_root,
            }),
            Self::TextDelta { text } => json!({ "text": text }),
            Self::ThinkingDelta { thinking } => json!({ "thinking": thinking }),
            Self::ToolStart {
                tool_id,
                name,
                input,
                iteration,
            } => json!({
                "tool_id": tool_id,
                "name": name,
                "input": input,
                "iteration": iteration,
            }),
            Self::ToolResult {
                tool_id,
                status,
                output,
                error,
            } => json!({
                "tool_id": tool_id,
                "status": status,
                "output": output,
                "error": error,
            }),
            Self::AgentSpawn {
                agent_id,
                agent_type,
                description,
                parent_tool_id,
                iteration,
                depth,
            } => json!({
                "agent_id": agent_id,
                "agent_type": agent_type,
                "description": description,
                "parent_tool_id": parent_tool_id,
                "iteration": iteration,
                "depth": depth,
            }),
            Self::AgentComplete { agent_id } => json!({ "agent_id": agent_id }),
            Self::HookPreTool {
                tool_name,
                action,
                message,
            } => json!({
                "hook_type": "pre_tool",
                "tool_name": tool_name,
                "action": action,
                "message": message,
            }),
            Self::HookPostTool { tool_name, message } => json!({
                "hook_type": "post_tool",
                "tool_name": tool_name,
                "message": message,
            }),
            Self::HtmlCreated { filename, url } => json!({
                "filename": filename,
                "url": url,
            }),
            Self::CostUpdate {
                input_tokens,
                output_tokens,
                cost,
                total_cost,
                context_used,
                context_max,
                context_percent,
            } => json!({
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "cost": cost,
                "total_cost": total_cost,
                "context_used": context_used,
                "context_max": context_max,
                "context_percent": context_percent,
            }),
            Self::MessageComplete {
                tools_used,
                total_tokens,
                stop_reason,
                trace_file,
            } => json!({
                "tools_used": tools_used,
                "total_tokens": total_tokens,
                "stop_reason": stop_reason,
                "trace_file": trace_file,
            }),
            Self::Error {
                error,
                details,
                trace_file,
            } => json!({
                "error": error,
                "details": details,
                "trace_file": trace_file,
            }),
        }
    }
}

/// Compact single-line rendering of a tool input for `tool_start` frames.
pub fn summarize_input(input: &Value) -> String {
    summarize_value(input, INPUT_SUMMARY_LEN)
}

/// Compact rendering of a tool result for `tool_result` frames.
pub fn summarize_output(output: &Value) -> String {
    summarize_value(output, OUTPUT_SUMMARY_LEN)
}

fn summarize_value(value: &Value, max_len: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let mut flat: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() > max_len {
        flat = flat.chars().take(max_len).collect();
        flat.push('…');
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_contract() {
        let frame = SseFrame::TextDelta {
            text: "x".to_owned(),
        };
        assert_eq!(frame.event_name(), "text_delta");
        assert_eq!(frame.payload(), json!({"text": "x"}));
    }

    #[test]
    fn hook_frames_carry_hook_type() {
        let frame = SseFrame::HookPreTool {
            tool_name: "Write".to_owned(),
            action: "block".to_owned(),
            message: "path_not_in_whitelist".to_owned(),
        };
        let payload = frame.payload();
        assert_eq!(payload["hook_type"], "pre_tool");
        assert_eq!(payload["action"], "block");
    }

    #[test]
    fn terminal_frames() {
        assert!(SseFrame::MessageComplete {
            tools_used: vec![],
            total_tokens: 0,
            stop_reason: "end_turn".to_owned(),
            trace_file: String::new(),
        }
        .is_terminal());
        assert!(SseFrame::Error {
            error: "boom".to_owned(),
            details: String::new(),
            trace_file: None,
        }
        .is_terminal());
        assert!(!SseFrame::TextDelta { text: String::new() }.is_terminal());
    }

    #[test]
    fn summaries_flatten_and_truncate() {
        let long = Value::String(format!("line1\nline2 {}", "x".repeat(300)));
        let summary = summarize_output(&long);
        assert!(!summary.contains('\n'));
        assert!(summary.chars().count() <= 201);
        assert!(summary.ends_with('…'));
    }
}
