//! Hook pipeline: the per-turn callback surfaces bound into the runtime.
//!
//! Three roles share this turn's event queue and pending-artifact map:
//!
//! 1. `keep_stream_open`: first in the pre-tool chain; exists because the
//!    runtime requires at least one pre-tool hook returning the explicit
//!    continue signal before it consults the permission callback.
//! 2. `pre_tool`: sandbox enforcement; emits allow/block events.
//! 3. `post_tool`: observation plus the HTML-artifact side channel.
//!
//! The queue and map are strictly per-turn. Two turns running concurrently
//! must never intermix hook frames.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use serde_json::{Value, json};

use crate::{
    runtime::{HookDecision, NamedHook, PermissionCallback, PermissionDecision},
    sandbox::{Decision, SandboxChecker},
    trace::{TraceEventType, TraceLogger},
};

// ─── Hook events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Allow,
    Block,
}

impl HookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
        }
    }
}

/// Events queued by hooks and drained into the outbound SSE stream by the
/// translator, FIFO within a turn.
#[derive(Debug, Clone)]
pub enum HookEvent {
    PreTool {
        tool_use_id: String,
        tool_name: String,
        action: HookAction,
        message: String,
    },
    PostTool {
        tool_use_id: String,
        tool_name: String,
        message: String,
    },
    HtmlCreated {
        tool_use_id: String,
        filename: String,
        url: String,
    },
}

// ─── Queue ───────────────────────────────────────────────────────────────────

/// Sender half, cloned into the hook callbacks.
#[derive(Clone)]
pub struct HookEventSender {
    tx: tokio::sync::mpsc::UnboundedSender<HookEvent>,
}

impl HookEventSender {
    fn push(&self, event: HookEvent) {
        // The receiver only disappears when the turn is being torn down.
        let _ = self.tx.send(event);
    }
}

/// Receiver half, owned by the translator.
pub struct HookEventDrain {
    rx: tokio::sync::mpsc::UnboundedReceiver<HookEvent>,
}

impl HookEventDrain {
    /// Pop everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<HookEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fresh per-turn queue.
pub fn hook_queue() -> (HookEventSender, HookEventDrain) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (HookEventSender { tx }, HookEventDrain { rx })
}

// ─── Pending artifacts ───────────────────────────────────────────────────────

/// `tool_use_id` → path of an HTML artifact the agent is about to write.
/// Entries are created in the pre-tool hook and consumed (or dropped when
/// the write failed) in the post-tool hook.
#[derive(Default)]
pub struct PendingArtifacts {
    inner: Mutex<HashMap<String, PathBuf>>,
}

impl PendingArtifacts {
    fn insert(&self, tool_use_id: &str, path: PathBuf) {
        self.inner
            .lock()
            .expect("artifact map lock poisoned")
            .insert(tool_use_id.to_owned(), path);
    }

    fn take(&self, tool_use_id: &str) -> Option<PathBuf> {
        self.inner
            .lock()
            .expect("artifact map lock poisoned")
            .remove(tool_use_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("artifact map lock poisoned").len()
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Per-turn hook pipeline. Build once per turn, then hand out the three
/// callbacks plus the permission callback bound to this state.
pub struct HookPipeline {
    checker: Arc<SandboxChecker>,
    trace: Arc<Mutex<TraceLogger>>,
    queue: HookEventSender,
    artifacts: Arc<PendingArtifacts>,
    /// One sandbox verdict per tool use, shared by both enforcement
    /// surfaces so the double check cannot double-count rate limits.
    verdicts: Mutex<HashMap<String, Decision>>,
    enabled: bool,
}

impl HookPipeline {
    pub fn new(
        checker: Arc<SandboxChecker>,
        trace: Arc<Mutex<TraceLogger>>,
        queue: HookEventSender,
        artifacts: Arc<PendingArtifacts>,
        enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            checker,
            trace,
            queue,
            artifacts,
            verdicts: Mutex::new(HashMap::new()),
            enabled,
        })
    }

    fn trace_log(&self, event_type: TraceEventType, data: Value) {
        self.trace
            .lock()
            .expect("trace lock poisoned")
            .log(event_type, data);
    }

    /// Evaluate the sandbox once per tool use; later calls for the same id
    /// reuse the verdict.
    fn verdict(&self, tool_use_id: Option<&str>, tool_name: &str, input: &Value) -> Decision {
        if !self.enabled {
            return Decision::Allow;
        }
        let Some(id) = tool_use_id else {
            return self.checker.check(tool_name, input);
        };
        let mut verdicts = self.verdicts.lock().expect("verdict cache lock poisoned");
        if let Some(cached) = verdicts.get(id) {
            return cached.clone();
        }
        let decision = self.checker.check(tool_name, input);
        verdicts.insert(id.to_owned(), decision.clone());
        decision
    }

    // ── Callbacks ────────────────────────────────────────────────────────

    /// Named `keep_stream_open` role; logs and signals "stream remains
    /// open; continue".
    pub fn keep_stream_open_hook(self: &Arc<Self>) -> NamedHook {
        let pipeline = Arc::clone(self);
        NamedHook::new(
            "keep_stream_open",
            Arc::new(move |input, _, _| {
                pipeline.trace_log(
                    TraceEventType::HookKeepAlive,
                    json!({ "tool": input.tool_name }),
                );
                HookDecision::KeepStreamOpen
            }),
        )
    }

    /// Sandbox enforcement hook.
    pub fn pre_tool_hook(self: &Arc<Self>) -> NamedHook {
        let pipeline = Arc::clone(self);
        NamedHook::new(
            "sandbox_pre_tool",
            Arc::new(move |input, tool_use_id, _| {
                let id = tool_use_id.unwrap_or_default();
                match pipeline.verdict(tool_use_id, &input.tool_name, &input.tool_input) {
                    Decision::Allow => {
                        pipeline.track_html_target(id, input);
                        pipeline.queue.push(HookEvent::PreTool {
                            tool_use_id: id.to_owned(),
                            tool_name: input.tool_name.clone(),
                            action: HookAction::Allow,
                            message: String::new(),
                        });
                        pipeline.trace_log(
                            TraceEventType::HookPreTool,
                            json!({ "tool": input.tool_name, "action": "allow" }),
                        );
                        HookDecision::Continue
                    }
                    Decision::Deny { reason, message } => {
                        pipeline.queue.push(HookEvent::PreTool {
                            tool_use_id: id.to_owned(),
                            tool_name: input.tool_name.clone(),
                            action: HookAction::Block,
                            message: format!("{}: {message}", reason.code()),
                        });
                        pipeline.trace_log(
                            TraceEventType::HookPreTool,
                            json!({ "tool": input.tool_name, "action": "block" }),
                        );
                        pipeline.trace_log(
                            TraceEventType::SandboxBlock,
                            json!({
                                "tool": input.tool_name,
                                "tool_id": id,
                                "reason": reason.code(),
                                "message": message,
                            }),
                        );
                        HookDecision::Block {
                            reason: format!("{}: {message}", reason.code()),
                        }
                    }
                }
            }),
        )
    }

    /// Observation hook plus the HTML-artifact side channel.
    pub fn post_tool_hook(self: &Arc<Self>) -> NamedHook {
        let pipeline = Arc::clone(self);
        NamedHook::new(
            "post_tool_observer",
            Arc::new(move |input, tool_use_id, _| {
                let id = tool_use_id.unwrap_or_default();
                pipeline.queue.push(HookEvent::PostTool {
                    tool_use_id: id.to_owned(),
                    tool_name: input.tool_name.clone(),
                    message: format!("{} finished", input.tool_name),
                });
                pipeline.trace_log(
                    TraceEventType::HookPostTool,
                    json!({ "tool": input.tool_name }),
                );

                if let Some(path) = pipeline.artifacts.take(id) {
                    let failed = input
                        .tool_response
                        .as_ref()
                        .and_then(|r| r.get("is_error"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if !failed {
                        let filename = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        let url = format!("/sandbox/{filename}");
                        pipeline.queue.push(HookEvent::HtmlCreated {
                            tool_use_id: id.to_owned(),
                            filename: filename.clone(),
                            url: url.clone(),
                        });
                        pipeline.trace_log(
                            TraceEventType::HtmlArtifact,
                            json!({ "tool_id": id, "filename": filename, "url": url }),
                        );
                    }
                }
                HookDecision::Continue
            }),
        )
    }

    /// The synchronous permission callback, second enforcement surface.
    pub fn permission_callback(self: &Arc<Self>) -> PermissionCallback {
        let pipeline = Arc::clone(self);
        Arc::new(move |tool_name, input, ctx| {
            match pipeline.verdict(ctx.tool_use_id.as_deref(), tool_name, input) {
                Decision::Allow => PermissionDecision::Allow,
                Decision::Deny { reason, message } => PermissionDecision::Deny {
                    message: format!("{}: {message}", reason.code()),
                    interrupt: false,
                },
            }
        })
    }

    /// Remember `.html` write targets so the post-tool hook can announce
    /// the served URL once the write lands.
    fn track_html_target(&self, tool_use_id: &str, input: &crate::runtime::HookInput) {
        if input.tool_name != "Write" {
            return;
        }
        let Some(raw) = input.tool_input.get("file_path").and_then(Value::as_str) else {
            return;
        };
        let path = PathBuf::from(raw);
        if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
        {
            self.artifacts.insert(tool_use_id, path);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use crate::runtime::HookInput;
    use crate::sandbox::SandboxPolicy;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        pipeline: Arc<HookPipeline>,
        drain: HookEventDrain,
        trace: Arc<Mutex<TraceLogger>>,
        _tmp: TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let settings = SandboxSettings {
            root: PathBuf::from("/srv/sandbox"),
            ..SandboxSettings::default()
        };
        let policy = SandboxPolicy::compile(&settings).unwrap();
        let checker = Arc::new(SandboxChecker::new(Arc::new(policy)));
        let trace = Arc::new(Mutex::new(
            TraceLogger::new("trace_hooks", tmp.path()).unwrap(),
        ));
        let (tx, drain) = hook_queue();
        let pipeline = HookPipeline::new(
            checker,
            trace.clone(),
            tx,
            Arc::new(PendingArtifacts::default()),
            true,
        );
        Fixture {
            pipeline,
            drain,
            trace,
            _tmp: tmp,
        }
    }

    fn write_input(path: &str) -> HookInput {
        HookInput {
            tool_name: "Write".to_owned(),
            tool_input: serde_json::json!({"file_path": path, "content": "<html></html>"}),
            tool_response: None,
        }
    }

    #[test]
    fn keep_stream_open_signals_continue() {
        let mut f = fixture();
        let hook = f.pipeline.keep_stream_open_hook();
        let decision = (hook.callback)(&write_input("/srv/sandbox/a.html"), Some("t1"), &Default::default());
        assert_eq!(decision, HookDecision::KeepStreamOpen);
        // Keep-alive logs to the trace but queues no frame.
        assert!(f.drain.drain().is_empty());
        assert_eq!(f.trace.lock().unwrap().stats().hooks_triggered, 1);
    }

    #[test]
    fn pre_tool_allow_queues_allow_event() {
        let mut f = fixture();
        let hook = f.pipeline.pre_tool_hook();
        let decision = (hook.callback)(&write_input("/srv/sandbox/a.html"), Some("t1"), &Default::default());
        assert_eq!(decision, HookDecision::Continue);
        let events = f.drain.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            HookEvent::PreTool { action: HookAction::Allow, tool_name, .. } if tool_name == "Write"
        ));
    }

    #[test]
    fn pre_tool_block_queues_block_and_traces_sandbox_block() {
        let mut f = fixture();
        let hook = f.pipeline.pre_tool_hook();
        let decision = (hook.callback)(&write_input("/etc/passwd"), Some("t1"), &Default::default());
        assert!(decision.is_block());
        let events = f.drain.drain();
        assert!(matches!(
            &events[0],
            HookEvent::PreTool { action: HookAction::Block, message, .. }
                if message.starts_with("path_not_in_whitelist")
        ));
        assert_eq!(f.trace.lock().unwrap().stats().sandbox_blocks, 1);
    }

    #[test]
    fn html_artifact_flows_through_post_hook() {
        let mut f = fixture();
        let pre = f.pipeline.pre_tool_hook();
        let post = f.pipeline.post_tool_hook();
        (pre.callback)(&write_input("/srv/sandbox/report.html"), Some("t1"), &Default::default());
        f.drain.drain();

        let mut response_input = write_input("/srv/sandbox/report.html");
        response_input.tool_response = Some(serde_json::json!({"content": "ok", "is_error": false}));
        (post.callback)(&response_input, Some("t1"), &Default::default());

        let events = f.drain.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], HookEvent::PostTool { .. }));
        assert!(matches!(
            &events[1],
            HookEvent::HtmlCreated { url, filename, .. }
                if url == "/sandbox/report.html" && filename == "report.html"
        ));
    }

    #[test]
    fn failed_write_drops_pending_artifact() {
        let mut f = fixture();
        let pre = f.pipeline.pre_tool_hook();
        let post = f.pipeline.post_tool_hook();
        (pre.callback)(&write_input("/srv/sandbox/report.html"), Some("t1"), &Default::default());
        f.drain.drain();

        let mut response_input = write_input("/srv/sandbox/report.html");
        response_input.tool_response = Some(serde_json::json!({"content": "disk full", "is_error": true}));
        (post.callback)(&response_input, Some("t1"), &Default::default());

        let events = f.drain.drain();
        assert_eq!(events.len(), 1, "only the post_tool event, no artifact");
        assert_eq!(f.pipeline.artifacts.len(), 0, "entry consumed either way");
    }

    #[test]
    fn non_html_write_tracks_nothing() {
        let f = fixture();
        let pre = f.pipeline.pre_tool_hook();
        (pre.callback)(&write_input("/srv/sandbox/notes.md"), Some("t1"), &Default::default());
        assert_eq!(f.pipeline.artifacts.len(), 0);
    }

    #[test]
    fn verdict_cache_prevents_double_rate_count() {
        let f = fixture();
        let hook = f.pipeline.pre_tool_hook();
        let permission = f.pipeline.permission_callback();

        let input = write_input("/srv/sandbox/a.html");
        (hook.callback)(&input, Some("t1"), &Default::default());
        // The permission callback for the same tool_use_id reuses the
        // cached verdict instead of re-running the rate-limited check.
        let decision = permission(
            "Write",
            &input.tool_input,
            &crate::runtime::PermissionContext {
                tool_use_id: Some("t1".to_owned()),
            },
        );
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[test]
    fn disabled_pipeline_allows_everything() {
        let tmp = TempDir::new().unwrap();
        let settings = SandboxSettings {
            root: PathBuf::from("/srv/sandbox"),
            ..SandboxSettings::default()
        };
        let policy = SandboxPolicy::compile(&settings).unwrap();
        let checker = Arc::new(SandboxChecker::new(Arc::new(policy)));
        let trace = Arc::new(Mutex::new(TraceLogger::new("trace_off", tmp.path()).unwrap()));
        let (tx, mut drain) = hook_queue();
        let pipeline = HookPipeline::new(
            checker,
            trace,
            tx,
            Arc::new(PendingArtifacts::default()),
            false,
        );
        let hook = pipeline.pre_tool_hook();
        let decision = (hook.callback)(&write_input("/etc/passwd"), Some("t1"), &Default::default());
        assert_eq!(decision, HookDecision::Continue);
        assert!(matches!(
            &drain.drain()[0],
            HookEvent::PreTool { action: HookAction::Allow, .. }
        ));
    }

    #[test]
    fn queue_preserves_fifo_order() {
        let mut f = fixture();
        let hook = f.pipeline.pre_tool_hook();
        (hook.callback)(&write_input("/srv/sandbox/a.html"), Some("t1"), &Default::default());
        (hook.callback)(&write_input("/srv/sandbox/b.html"), Some("t2"), &Default::default());
        let events = f.drain.drain();
        let ids: Vec<&str> = events
            .iter()
            .map(|e| match e {
                HookEvent::PreTool { tool_use_id, .. } => tool_use_id.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }
}
