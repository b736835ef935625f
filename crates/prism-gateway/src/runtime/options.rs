//! Per-turn options handed to the agent runtime.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::callbacks::{NamedHook, PermissionCallback};

/// Permission mode requested from the runtime. `Default` is required for
/// the synchronous permission callback to be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

/// Configuration of one MCP server the runtime may start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One envelope of the streaming prompt iterator. Stream mode accepts only
/// `user`-typed envelopes here, which is why prior turns are flattened into
/// the system preamble instead of being replayed as messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEnvelope {
    pub role: String,
    pub content: String,
}

impl PromptEnvelope {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }
}

/// Everything the runtime needs for one turn. The callbacks are `Arc`s, so
/// cloning the options for a retry re-binds the same per-turn state.
#[derive(Clone, Default)]
pub struct AgentOptions {
    pub model: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub mcp_servers: HashMap<String, McpServerConfig>,
    pub permission_mode: PermissionMode,
    pub max_turns: u32,
    pub cwd: Option<PathBuf>,
    /// Extra environment for the runtime subprocess (credentials, model
    /// ids, stream-encoding overrides).
    pub env: Vec<(String, String)>,
    pub permission_callback: Option<PermissionCallback>,
    pub pre_tool_hooks: Vec<NamedHook>,
    pub post_tool_hooks: Vec<NamedHook>,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("model", &self.model)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("permission_mode", &self.permission_mode)
            .field("max_turns", &self.max_turns)
            .field("pre_tool_hooks", &self.pre_tool_hooks)
            .field("post_tool_hooks", &self.post_tool_hooks)
            .finish_non_exhaustive()
    }
}

impl AgentOptions {
    /// The wire-serializable subset sent to the runtime subprocess on start.
    pub fn wire_config(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "system_prompt": self.system_prompt,
            "allowed_tools": self.allowed_tools,
            "disallowed_tools": self.disallowed_tools,
            "mcp_servers": self.mcp_servers,
            "permission_mode": self.permission_mode.as_str(),
            "max_turns": self.max_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_wire_names() {
        assert_eq!(PermissionMode::Default.as_str(), "default");
        assert_eq!(PermissionMode::BypassPermissions.as_str(), "bypassPermissions");
    }

    #[test]
    fn wire_config_omits_callbacks() {
        let opts = AgentOptions {
            model: "m".to_owned(),
            max_turns: 3,
            ..Default::default()
        };
        let wire = opts.wire_config();
        assert_eq!(wire["model"], "m");
        assert_eq!(wire["max_turns"], 3);
        assert!(wire.get("permission_callback").is_none());
    }

    #[test]
    fn user_envelope_shape() {
        let env = PromptEnvelope::user("hi");
        assert_eq!(env.role, "user");
        assert_eq!(env.content, "hi");
    }
}
