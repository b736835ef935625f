//! Per-turn trace records: the persisted, replayable log of a turn.

pub mod logger;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use logger::TraceLogger;
pub use store::{TraceListQuery, TraceStore, TraceSummary};

/// Trace output captured for a single tool result is capped at this many
/// characters; the rest is dropped and `output_truncated` is set.
pub const MAX_TRACED_OUTPUT: usize = 5_000;

// ─── Status and stats ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

/// Rolling aggregates maintained while the turn runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats {
    pub tool_calls: u64,
    pub iterations: u64,
    pub sub_agents: u64,
    pub errors: u64,
    pub hooks_triggered: u64,
    pub sandbox_blocks: u64,
    pub thinking_blocks: u64,
    pub thinking_chars: u64,
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    TurnStart,
    ToolStart,
    ToolResult,
    SandboxBlock,
    HookPreTool,
    HookPostTool,
    HookKeepAlive,
    HtmlArtifact,
    Thinking,
    Text,
    AgentSpawn,
    AgentComplete,
    Retry,
    CostUpdate,
    RuntimeMessage,
    TurnComplete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub event_type: TraceEventType,
    pub summary: String,
    pub data: Value,
}

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub trace_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    pub duration_ms: Option<u64>,
    pub stats: TraceStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub metadata: TraceMetadata,
    pub events: Vec<TraceEvent>,
}

/// Cap `output` at [`MAX_TRACED_OUTPUT`] characters. Returns the kept text
/// and whether anything was dropped.
pub fn truncate_output(output: &str) -> (String, bool) {
    if output.chars().count() <= MAX_TRACED_OUTPUT {
        return (output.to_owned(), false);
    }
    (output.chars().take(MAX_TRACED_OUTPUT).collect(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        let (kept, truncated) = truncate_output("hello");
        assert_eq!(kept, "hello");
        assert!(!truncated);
    }

    #[test]
    fn long_output_is_capped() {
        let long = "x".repeat(MAX_TRACED_OUTPUT + 100);
        let (kept, truncated) = truncate_output(&long);
        assert_eq!(kept.chars().count(), MAX_TRACED_OUTPUT);
        assert!(truncated);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_TRACED_OUTPUT + 1);
        let (kept, truncated) = truncate_output(&long);
        assert!(truncated);
        assert_eq!(kept.chars().count(), MAX_TRACED_OUTPUT);
    }
}
