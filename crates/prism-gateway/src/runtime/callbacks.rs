//! Callback contracts the runtime invokes around tool execution.
//!
//! The permission callback is consulted synchronously before each tool
//! runs; hook callbacks fire at tool-lifecycle boundaries. Both are plain
//! `Arc` closures bound to per-turn state, so nothing leaks across turns.

use std::sync::Arc;

use serde_json::Value;

// ─── Permission callback ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny {
        message: String,
        /// Whether the runtime should abort the whole session. The gateway
        /// always passes `false`: a denial is not an error.
        interrupt: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    pub tool_use_id: Option<String>,
}

pub type PermissionCallback =
    Arc<dyn Fn(&str, &Value, &PermissionContext) -> PermissionDecision + Send + Sync>;

// ─── Hook callbacks ──────────────────────────────────────────────────────────

/// Payload handed to a hook callback.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub tool_name: String,
    pub tool_input: Value,
    /// Present for post-tool hooks only.
    pub tool_response: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub session_id: String,
}

/// Decision object returned by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// `{}`: continue normally.
    Continue,
    /// `{"decision": "block", "reason": ...}`: reject the operation.
    Block { reason: String },
    /// `{"continue": true}`: the explicit keep-stream-open signal the
    /// runtime requires from at least one pre-tool hook in streaming mode.
    KeepStreamOpen,
}

impl HookDecision {
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

pub type HookCallback =
    Arc<dyn Fn(&HookInput, Option<&str>, &HookContext) -> HookDecision + Send + Sync>;

/// A hook with a stable role name, so runtime-specific workarounds (the
/// keep-stream-open hook) can be toggled without refactoring the chain.
#[derive(Clone)]
pub struct NamedHook {
    pub name: &'static str,
    pub callback: HookCallback,
}

impl NamedHook {
    pub fn new(name: &'static str, callback: HookCallback) -> Self {
        Self { name, callback }
    }
}

impl std::fmt::Debug for NamedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedHook").field("name", &self.name).finish()
    }
}
