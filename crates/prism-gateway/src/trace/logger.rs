//! Append-only trace logger with eager, crash-safe flushes.
//!
//! Every `log` call appends one event, updates the rolling stats, and
//! rewrites the trace file via write-temp-then-rename so a partial file is
//! either absent or parseable.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

use super::{
    TraceEvent, TraceEventType, TraceMetadata, TraceRecord, TraceStats, TraceStatus,
};

pub struct TraceLogger {
    record: TraceRecord,
    path: PathBuf,
    started: Instant,
}

impl TraceLogger {
    /// Generate a fresh trace id: `trace_<YYYYmmdd_HHMMSS>_<8hex>`.
    pub fn generate_id() -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        format!("trace_{stamp}_{suffix}")
    }

    /// Open a logger for `trace_id` under `dir`, writing the initial
    /// `running` snapshot immediately.
    pub fn new(trace_id: &str, dir: &Path) -> GatewayResult<Self> {
        fs::create_dir_all(dir)?;
        let mut logger = Self {
            record: TraceRecord {
                metadata: TraceMetadata {
                    trace_id: trace_id.to_owned(),
                    start_time: Utc::now(),
                    end_time: None,
                    status: TraceStatus::Running,
                    duration_ms: None,
                    stats: TraceStats::default(),
                },
                events: Vec::new(),
            },
            path: dir.join(format!("{trace_id}.json")),
            started: Instant::now(),
        };
        logger.flush()?;
        Ok(logger)
    }

    pub fn trace_id(&self) -> &str {
        &self.record.metadata.trace_id
    }

    /// Trace filename as surfaced in `message_complete` / `error` frames.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> &TraceStats {
        &self.record.metadata.stats
    }

    pub fn status(&self) -> TraceStatus {
        self.record.metadata.status
    }

    /// Append one event, update stats, flush.
    pub fn log(&mut self, event_type: TraceEventType, data: Value) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.update_stats(event_type, &data);
        let event = TraceEvent {
            timestamp: Utc::now(),
            elapsed_ms,
            event_type,
            summary: summarize(event_type, &data),
            data,
        };
        self.record.events.push(event);
        if let Err(e) = self.flush() {
            tracing::warn!(trace_id = %self.trace_id(), "trace flush failed: {e}");
        }
    }

    /// Record a fatal error and mark the trace as failed.
    pub fn log_error(&mut self, kind: &str, message: &str) {
        self.record.metadata.status = TraceStatus::Error;
        self.log(
            TraceEventType::Error,
            json!({ "kind": kind, "message": message }),
        );
    }

    /// Mark the trace as completed and write the final snapshot.
    pub fn complete(&mut self) {
        // A trace that already failed keeps its error status.
        if self.record.metadata.status == TraceStatus::Running {
            self.record.metadata.status = TraceStatus::Completed;
        }
        self.record.metadata.end_time = Some(Utc::now());
        self.record.metadata.duration_ms = Some(self.started.elapsed().as_millis() as u64);
        if let Err(e) = self.flush() {
            tracing::warn!(trace_id = %self.trace_id(), "final trace flush failed: {e}");
        }
    }

    fn update_stats(&mut self, event_type: TraceEventType, data: &Value) {
        let stats = &mut self.record.metadata.stats;
        match event_type {
            TraceEventType::ToolStart => {
                stats.tool_calls += 1;
                if data.get("tool").and_then(Value::as_str) == Some("Task") {
                    stats.sub_agents += 1;
                }
                if let Some(iter) = data.get("iteration").and_then(Value::as_u64) {
                    stats.iterations = stats.iterations.max(iter);
                }
            }
            TraceEventType::SandboxBlock => stats.sandbox_blocks += 1,
            TraceEventType::HookPreTool
            | TraceEventType::HookPostTool
            | TraceEventType::HookKeepAlive => stats.hooks_triggered += 1,
            TraceEventType::Thinking => {
                stats.thinking_blocks += 1;
                if let Some(len) = data.get("length").and_then(Value::as_u64) {
                    stats.thinking_chars += len;
                }
            }
            TraceEventType::Error => stats.errors += 1,
            _ => {}
        }
    }

    /// Write-temp-then-rename so readers never observe a torn file.
    fn flush(&mut self) -> GatewayResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&self.record)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            GatewayError::TraceStore(format!("rename {:?} failed: {e}", self.path))
        })?;
        Ok(())
    }
}

/// One-line human-readable summaries, keyed by event type.
fn summarize(event_type: TraceEventType, data: &Value) -> String {
    let s = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or("?");
    match event_type {
        TraceEventType::TurnStart => format!("turn started (session {})", s("session_id")),
        TraceEventType::ToolStart => format!("tool {} started", s("tool")),
        TraceEventType::ToolResult => format!("tool {} finished: {}", s("tool"), s("status")),
        TraceEventType::SandboxBlock => {
            format!("sandbox blocked {}: {}", s("tool"), s("reason"))
        }
        TraceEventType::HookPreTool => format!("pre-tool hook for {}: {}", s("tool"), s("action")),
        TraceEventType::HookPostTool => format!("post-tool hook for {}", s("tool")),
        TraceEventType::HookKeepAlive => "keep-stream-open hook fired".to_owned(),
        TraceEventType::HtmlArtifact => format!("html artifact at {}", s("url")),
        TraceEventType::Thinking => format!(
            "thinking block ({} chars)",
            data.get("length").and_then(Value::as_u64).unwrap_or(0)
        ),
        TraceEventType::Text => format!(
            "text delta ({} chars)",
            data.get("length").and_then(Value::as_u64).unwrap_or(0)
        ),
        TraceEventType::AgentSpawn => format!("sub-agent spawned ({})", s("agent_type")),
        TraceEventType::AgentComplete => format!("sub-agent {} finished", s("agent_id")),
        TraceEventType::Retry => format!("stream retry {}", s("attempt")),
        TraceEventType::CostUpdate => format!(
            "usage: {} in / {} out tokens",
            data.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            data.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        ),
        TraceEventType::RuntimeMessage => format!("runtime message: {}", s("kind")),
        TraceEventType::TurnComplete => format!("turn complete: {}", s("stop_reason")),
        TraceEventType::Error => format!("error ({}): {}", s("kind"), s("message")),
    }
}
