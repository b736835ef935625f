//! Read side of the trace directory: listing, fetching, and the timeline
//! view consumed by the UI.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

use super::{TraceEventType, TraceRecord, TraceStats, TraceStatus};

// ─── Listing ─────────────────────────────────────────────────────────────────

/// Filters accepted by `GET /api/traces`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceListQuery {
    pub status: Option<TraceStatus>,
    pub has_errors: Option<bool>,
    pub has_sandbox_blocks: Option<bool>,
    /// Substring match over trace id and event summaries.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub status: TraceStatus,
    pub duration_ms: Option<u64>,
    pub stats: TraceStats,
}

#[derive(Debug, Clone)]
pub struct TraceStore {
    dir: PathBuf,
}

impl TraceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List traces, newest first, applying `query` filters.
    pub fn list(&self, query: &TraceListQuery) -> GatewayResult<Vec<TraceSummary>> {
        let mut records = self.scan()?;
        records.sort_by(|a, b| b.metadata.start_time.cmp(&a.metadata.start_time));

        let matches = |record: &TraceRecord| -> bool {
            if let Some(status) = query.status {
                if record.metadata.status != status {
                    return false;
                }
            }
            if let Some(want) = query.has_errors {
                if (record.metadata.stats.errors > 0) != want {
                    return false;
                }
            }
            if let Some(want) = query.has_sandbox_blocks {
                if (record.metadata.stats.sandbox_blocks > 0) != want {
                    return false;
                }
            }
            if let Some(needle) = &query.search {
                let needle = needle.to_lowercase();
                let in_id = record.metadata.trace_id.to_lowercase().contains(&needle);
                let in_events = record
                    .events
                    .iter()
                    .any(|e| e.summary.to_lowercase().contains(&needle));
                if !in_id && !in_events {
                    return false;
                }
            }
            true
        };

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(50);
        Ok(records
            .into_iter()
            .filter(|r| matches(r))
            .skip(offset)
            .take(limit)
            .map(|r| TraceSummary {
                trace_id: r.metadata.trace_id,
                start_time: r.metadata.start_time,
                status: r.metadata.status,
                duration_ms: r.metadata.duration_ms,
                stats: r.metadata.stats,
            })
            .collect())
    }

    /// Load one trace by id.
    pub fn get(&self, trace_id: &str) -> GatewayResult<TraceRecord> {
        let path = self.path_for(trace_id)?;
        let raw = fs::read_to_string(&path)
            .map_err(|_| GatewayError::TraceNotFound(trace_id.to_owned()))?;
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::TraceStore(format!("corrupt trace {trace_id}: {e}")))
    }

    /// Path of the trace file, rejecting ids that would escape the trace dir.
    pub fn path_for(&self, trace_id: &str) -> GatewayResult<PathBuf> {
        if trace_id.contains('/') || trace_id.contains('\\') || trace_id.contains("..") {
            return Err(GatewayError::TraceNotFound(trace_id.to_owned()));
        }
        Ok(self.dir.join(format!("{trace_id}.json")))
    }

    fn scan(&self) -> GatewayResult<Vec<TraceRecord>> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(GatewayError::from)
                .and_then(|raw| Ok(serde_json::from_str::<TraceRecord>(&raw)?))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping unreadable trace {path:?}: {e}"),
            }
        }
        Ok(records)
    }

    /// Reconstruct per-tool spans grouped by iteration for the timeline view.
    pub fn timeline(&self, trace_id: &str) -> GatewayResult<TimelineView> {
        let record = self.get(trace_id)?;
        let mut spans: Vec<ToolSpan> = Vec::new();

        // Task invocations log both tool_start and agent_spawn; only the
        // tool events carry span identity, so the agent events are skipped.
        for event in &record.events {
            match event.event_type {
                TraceEventType::ToolStart => {
                    spans.push(ToolSpan {
                        tool_id: str_field(&event.data, "tool_id"),
                        name: str_field(&event.data, "tool"),
                        iteration: event.data.get("iteration").and_then(Value::as_u64).unwrap_or(0),
                        parallel_group: event
                            .data
                            .get("parallel_group")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        start_ms: event.elapsed_ms,
                        end_ms: None,
                        status: "running".to_owned(),
                    });
                }
                TraceEventType::ToolResult => {
                    let id = str_field(&event.data, "tool_id");
                    if let Some(span) = spans.iter_mut().rev().find(|s| s.tool_id == id) {
                        span.end_ms = Some(event.elapsed_ms);
                        span.status = event
                            .data
                            .get("status")
                            .and_then(Value::as_str)
                            .unwrap_or("completed")
                            .to_owned();
                    }
                }
                _ => {}
            }
        }

        let mut iterations: Vec<IterationSpans> = Vec::new();
        for span in spans {
            match iterations.iter_mut().find(|g| g.iteration == span.iteration) {
                Some(group) => group.spans.push(span),
                None => iterations.push(IterationSpans {
                    iteration: span.iteration,
                    spans: vec![span],
                }),
            }
        }
        iterations.sort_by_key(|g| g.iteration);

        Ok(TimelineView {
            trace_id: record.metadata.trace_id,
            status: record.metadata.status,
            total_duration_ms: record.metadata.duration_ms,
            iterations,
        })
    }
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

// ─── Timeline view ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpan {
    pub tool_id: String,
    pub name: String,
    pub iteration: u64,
    pub parallel_group: Option<String>,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationSpans {
    pub iteration: u64,
    pub spans: Vec<ToolSpan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineView {
    pub trace_id: String,
    pub status: TraceStatus,
    pub total_duration_ms: Option<u64>,
    pub iterations: Vec<IterationSpans>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceLogger;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_trace(dir: &Path, id: &str, blocks: bool) {
        let mut logger = TraceLogger::new(id, dir).unwrap();
        logger.log(
            TraceEventType::ToolStart,
            json!({"tool": "Glob", "tool_id": "t1", "iteration": 1}),
        );
        if blocks {
            logger.log(
                TraceEventType::SandboxBlock,
                json!({"tool": "Write", "reason": "path_not_in_whitelist"}),
            );
        }
        logger.log(
            TraceEventType::ToolResult,
            json!({"tool": "Glob", "tool_id": "t1", "status": "completed"}),
        );
        logger.complete();
    }

    #[test]
    fn list_returns_written_traces() {
        let tmp = TempDir::new().unwrap();
        write_trace(tmp.path(), "trace_a", false);
        write_trace(tmp.path(), "trace_b", true);
        let store = TraceStore::new(tmp.path());
        let all = store.list(&TraceListQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn sandbox_block_filter() {
        let tmp = TempDir::new().unwrap();
        write_trace(tmp.path(), "trace_a", false);
        write_trace(tmp.path(), "trace_b", true);
        let store = TraceStore::new(tmp.path());
        let blocked = store
            .list(&TraceListQuery {
                has_sandbox_blocks: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].trace_id, "trace_b");
    }

    #[test]
    fn search_matches_summaries() {
        let tmp = TempDir::new().unwrap();
        write_trace(tmp.path(), "trace_a", true);
        let store = TraceStore::new(tmp.path());
        let hits = store
            .list(&TraceListQuery {
                search: Some("blocked Write".to_owned()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn limit_and_offset_page_through() {
        let tmp = TempDir::new().unwrap();
        for i in 0..5 {
            write_trace(tmp.path(), &format!("trace_{i}"), false);
        }
        let store = TraceStore::new(tmp.path());
        let page = store
            .list(&TraceListQuery {
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn get_missing_trace_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = TraceStore::new(tmp.path());
        assert!(matches!(
            store.get("trace_nope"),
            Err(GatewayError::TraceNotFound(_))
        ));
    }

    #[test]
    fn path_for_rejects_traversal() {
        let store = TraceStore::new("/tmp/traces");
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("a/b").is_err());
    }

    #[test]
    fn timeline_pairs_start_and_result() {
        let tmp = TempDir::new().unwrap();
        write_trace(tmp.path(), "trace_t", false);
        let store = TraceStore::new(tmp.path());
        let view = store.timeline("trace_t").unwrap();
        assert_eq!(view.iterations.len(), 1);
        let span = &view.iterations[0].spans[0];
        assert_eq!(span.name, "Glob");
        assert_eq!(span.status, "completed");
        assert!(span.end_ms.is_some());
    }

    #[test]
    fn missing_dir_lists_empty() {
        let store = TraceStore::new("/nonexistent/trace/dir");
        assert!(store.list(&TraceListQuery::default()).unwrap().is_empty());
    }
}
