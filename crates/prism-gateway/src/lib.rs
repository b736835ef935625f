//! prism-gateway: an HTTP service that mediates between a browser UI and
//! an LLM-driven agent runtime.
//!
//! For each user turn the gateway opens a streaming session to the
//! runtime, intercepts every tool invocation through a sandbox policy,
//! re-emits the agent's incremental output to the browser as SSE enriched
//! with lifecycle and policy events, persists a replayable trace, and
//! maintains aggregate service metrics.

pub mod config;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod metrics;
pub mod runtime;
pub mod sandbox;
pub mod search;
pub mod skills;
pub mod trace;
pub mod translator;
pub mod turn;

/// Convenience re-exports for the most commonly used types across the
/// gateway.
pub mod prelude {
    pub use crate::config::{AppConfig, load_default_config};
    pub use crate::error::{GatewayError, GatewayResult};
    pub use crate::gateway::{AppState, build_router, build_state, start_gateway};
    pub use crate::hooks::{HookEvent, HookPipeline, PendingArtifacts, hook_queue};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
    pub use crate::runtime::{
        AgentOptions, AgentRuntime, PromptEnvelope, RuntimeError, RuntimeMessage,
    };
    pub use crate::sandbox::{Decision, SandboxChecker, SandboxPolicy};
    pub use crate::trace::{TraceLogger, TraceStore};
    pub use crate::translator::{EventTranslator, SseFrame};
    pub use crate::turn::{TurnCoordinator, TurnRequest};
}
