//! Interface to the agent runtime: an opaque async message source plus the
//! callback surfaces it invokes around tool execution.

pub mod callbacks;
pub mod messages;
pub mod options;
pub mod process;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use callbacks::{
    HookCallback, HookContext, HookDecision, HookInput, NamedHook, PermissionCallback,
    PermissionContext, PermissionDecision,
};
pub use messages::{AssistantMessage, ContentBlock, RuntimeMessage, TurnResult, Usage};
pub use options::{AgentOptions, McpServerConfig, PermissionMode, PromptEnvelope};
pub use process::ProcessRuntime;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("runtime terminated: {0}")]
    Terminated(String),
}

impl RuntimeError {
    /// Transient upstream failures are retried with backoff; everything
    /// else propagates immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Io(_))
    }

    /// Short code used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
            Self::Protocol(_) => "protocol",
            Self::Terminated(_) => "terminated",
        }
    }
}

// ─── The runtime seam ────────────────────────────────────────────────────────

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<RuntimeMessage, RuntimeError>> + Send>>;

/// An agent runtime the gateway can drive: give it a prompt and per-turn
/// options, get back a stream of [`RuntimeMessage`]s. Implementations must
/// invoke the option's hook chain and permission callback around every
/// tool execution.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn open_stream(
        &self,
        prompt: Vec<PromptEnvelope>,
        options: AgentOptions,
    ) -> Result<MessageStream, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(RuntimeError::Connection("x".into()).is_retriable());
        assert!(RuntimeError::Timeout("x".into()).is_retriable());
        assert!(RuntimeError::Io("x".into()).is_retriable());
        assert!(!RuntimeError::Protocol("x".into()).is_retriable());
        assert!(!RuntimeError::Terminated("x".into()).is_retriable());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(RuntimeError::Connection("x".into()).kind(), "connection");
        assert_eq!(RuntimeError::Terminated("x".into()).kind(), "terminated");
    }
}
