//! Event translator: converts the inbound runtime message stream into
//! outbound SSE frames, tracking tool lifecycles, iteration and parallelism
//! metadata, sub-agent nesting, and token accounting.

pub mod events;
pub mod retry;
pub mod sanitize;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{
    hooks::{HookAction, HookEvent, HookEventDrain},
    metrics::{MetricsCollector, RequestStamp},
    runtime::{AssistantMessage, ContentBlock, RuntimeMessage, TurnResult},
    trace::{TraceEventType, TraceLogger, truncate_output},
};

pub use events::{SseFrame, summarize_input, summarize_output};
pub use retry::{MAX_RETRIES, open_with_retry};
pub use sanitize::scrub_replacement_runs;

/// The declared context window reported in `cost_update` frames.
const CONTEXT_WINDOW: u64 = 200_000;

/// Rough token estimate for thinking blocks (4 chars per token).
const CHARS_PER_TOKEN: u64 = 4;

/// The outbound side went away (client disconnected). The turn unwinds;
/// finalization still runs in the coordinator.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientGone;

// ─── Per-tool state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub input: Value,
    pub status: ToolStatus,
    pub iteration: u32,
    pub parallel_group: Option<String>,
    pub start: Instant,
}

// ─── Translator ──────────────────────────────────────────────────────────────

pub struct EventTranslator {
    frames: UnboundedSender<SseFrame>,
    trace: Arc<Mutex<TraceLogger>>,
    metrics: Arc<MetricsCollector>,
    stamp: RequestStamp,
    hook_events: HookEventDrain,
    max_turns: u32,
    trace_file: String,

    current_text: String,
    tool_states: HashMap<String, ToolInvocation>,
    current_iteration: u32,
    current_depth: u32,
    open_tasks: Vec<String>,
    blocked_tools: std::collections::HashSet<String>,
    tools_used: Vec<String>,
    first_token_seen: bool,
    stop_reason: Option<String>,
    completed: bool,
}

impl EventTranslator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frames: UnboundedSender<SseFrame>,
        trace: Arc<Mutex<TraceLogger>>,
        metrics: Arc<MetricsCollector>,
        stamp: RequestStamp,
        hook_events: HookEventDrain,
        max_turns: u32,
        trace_file: String,
    ) -> Self {
        Self {
            frames,
            trace,
            metrics,
            stamp,
            hook_events,
            max_turns,
            trace_file,
            current_text: String::new(),
            tool_states: HashMap::new(),
            current_iteration: 0,
            current_depth: 0,
            open_tasks: Vec::new(),
            blocked_tools: std::collections::HashSet::new(),
            tools_used: Vec::new(),
            first_token_seen: false,
            stop_reason: None,
            completed: false,
        }
    }

    /// Whether `message_complete` has been emitted.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn trace_file(&self) -> &str {
        &self.trace_file
    }

    fn emit(&self, frame: SseFrame) -> Result<(), ClientGone> {
        self.frames.send(frame).map_err(|_| ClientGone)
    }

    fn trace_log(&self, event_type: TraceEventType, data: Value) {
        self.trace
            .lock()
            .expect("trace lock poisoned")
            .log(event_type, data);
    }

    /// Drain queued hook events and emit them in FIFO order. Pre-tool
    /// blocks are remembered so the matching tool-use block is suppressed.
    fn flush_hook_events(&mut self) -> Result<(), ClientGone> {
        for event in self.hook_events.drain() {
            match event {
                HookEvent::PreTool {
                    tool_use_id,
                    tool_name,
                    action,
                    message,
                } => {
                    if action == HookAction::Block {
                        self.blocked_tools.insert(tool_use_id);
                    }
                    self.emit(SseFrame::HookPreTool {
                        tool_name,
                        action: action.as_str().to_owned(),
                        message,
                    })?;
                }
                HookEvent::PostTool {
                    tool_name, message, ..
                } => {
                    self.emit(SseFrame::HookPostTool { tool_name, message })?;
                }
                HookEvent::HtmlCreated { filename, url, .. } => {
                    self.emit(SseFrame::HtmlCreated { filename, url })?;
                }
            }
        }
        Ok(())
    }

    /// Feed one inbound message through the translator.
    pub fn handle_message(&mut self, message: RuntimeMessage) -> Result<(), ClientGone> {
        match message {
            RuntimeMessage::Init => Ok(()),
            RuntimeMessage::Assistant(assistant) => self.handle_assistant(assistant),
            RuntimeMessage::Completion(result) => self.handle_completion(result),
            RuntimeMessage::Unknown(value) => {
                let kind = value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned();
                self.trace_log(TraceEventType::RuntimeMessage, json!({ "kind": kind }));
                Ok(())
            }
        }
    }

    // ── Assistant messages ───────────────────────────────────────────────

    fn handle_assistant(&mut self, message: AssistantMessage) -> Result<(), ClientGone> {
        // Tool uses announced together share a parallel group.
        let tool_uses = message
            .content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .count();
        let parallel_group = if tool_uses >= 2 {
            Some(Uuid::new_v4().simple().to_string()[..8].to_owned())
        } else {
            None
        };

        let mut iteration_bumped = false;
        for block in message.content {
            match block {
                ContentBlock::Thinking { thinking } => self.on_thinking(&thinking)?,
                ContentBlock::Text { text } => self.on_text(&text)?,
                ContentBlock::ToolUse { id, name, input } => {
                    self.on_tool_use(id, name, input, &parallel_group, &mut iteration_bumped)?;
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    self.on_tool_result(&tool_use_id, content, is_error.unwrap_or(false))?;
                }
            }
        }
        Ok(())
    }

    fn on_thinking(&mut self, thinking: &str) -> Result<(), ClientGone> {
        let clean = scrub_replacement_runs(thinking);
        if clean.is_empty() {
            return Ok(());
        }
        self.trace_log(
            TraceEventType::Thinking,
            json!({
                "length": clean.chars().count(),
                "est_tokens": clean.chars().count() as u64 / CHARS_PER_TOKEN,
            }),
        );
        self.emit(SseFrame::ThinkingDelta { thinking: clean })
    }

    fn on_text(&mut self, text: &str) -> Result<(), ClientGone> {
        // The runtime may resend the accumulated text of the current
        // iteration; only the fresh suffix goes out.
        let delta = if let Some(suffix) = text.strip_prefix(self.current_text.as_str()) {
            self.current_text = text.to_owned();
            suffix.to_owned()
        } else {
            self.current_text.push_str(text);
            text.to_owned()
        };
        let clean = scrub_replacement_runs(&delta);
        if clean.is_empty() {
            return Ok(());
        }
        if !self.first_token_seen {
            self.first_token_seen = true;
            self.metrics.record_first_token(&self.stamp);
        }
        self.trace_log(
            TraceEventType::Text,
            json!({ "length": clean.chars().count() }),
        );
        self.emit(SseFrame::TextDelta { text: clean })
    }

    fn on_tool_use(
        &mut self,
        id: String,
        name: String,
        input: Value,
        parallel_group: &Option<String>,
        iteration_bumped: &mut bool,
    ) -> Result<(), ClientGone> {
        // Hook events for this tool were queued before the message was
        // forwarded; surface them ahead of the lifecycle frame.
        self.flush_hook_events()?;

        if self.blocked_tools.contains(&id) {
            // The sandbox wrote the block into the trace; no tool_start,
            // and no tool_result will arrive.
            return Ok(());
        }

        if !*iteration_bumped {
            self.current_iteration += 1;
            self.current_text.clear();
            *iteration_bumped = true;
        }

        self.metrics.record_tool_call(&name);
        if !self.tools_used.contains(&name) {
            self.tools_used.push(name.clone());
        }

        let invocation = ToolInvocation {
            name: name.clone(),
            input: input.clone(),
            status: ToolStatus::Running,
            iteration: self.current_iteration,
            parallel_group: parallel_group.clone(),
            start: Instant::now(),
        };
        self.tool_states.insert(id.clone(), invocation);

        if name == "Task" {
            let parent = self.open_tasks.last().cloned();
            self.current_depth += 1;
            self.open_tasks.push(id.clone());
            let agent_type = input
                .get("subagent_type")
                .and_then(Value::as_str)
                .unwrap_or("general-purpose")
                .to_owned();
            let description = input
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            self.trace_log(
                TraceEventType::ToolStart,
                json!({
                    "tool": "Task",
                    "tool_id": id,
                    "iteration": self.current_iteration,
                    "parallel_group": parallel_group,
                }),
            );
            self.trace_log(
                TraceEventType::AgentSpawn,
                json!({
                    "tool_id": id,
                    "agent_type": agent_type,
                    "depth": self.current_depth,
                }),
            );
            self.emit(SseFrame::AgentSpawn {
                agent_id: id,
                agent_type,
                description,
                parent_tool_id: parent,
                iteration: self.current_iteration,
                depth: self.current_depth,
            })
        } else {
            self.trace_log(
                TraceEventType::ToolStart,
                json!({
                    "tool": name,
                    "tool_id": id,
                    "iteration": self.current_iteration,
                    "parallel_group": parallel_group,
                }),
            );
            self.emit(SseFrame::ToolStart {
                tool_id: id,
                name,
                input: summarize_input(&input),
                iteration: self.current_iteration,
            })
        }
    }

    fn on_tool_result(
        &mut self,
        tool_use_id: &str,
        content: Option<Value>,
        is_error: bool,
    ) -> Result<(), ClientGone> {
        if self.blocked_tools.contains(tool_use_id) {
            // Should not happen (the runtime suppresses these), but a
            // result for a blocked tool must never surface.
            return Ok(());
        }
        let Some(invocation) = self.tool_states.get_mut(tool_use_id) else {
            self.trace_log(
                TraceEventType::RuntimeMessage,
                json!({ "kind": "orphan_tool_result", "tool_id": tool_use_id }),
            );
            return Ok(());
        };

        invocation.status = if is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Completed
        };
        let duration_ms = invocation.start.elapsed().as_millis() as u64;
        let name = invocation.name.clone();
        let was_task = name == "Task";

        let output_value = content.unwrap_or(Value::Null);
        let output_summary = summarize_output(&output_value);
        let raw_output = match &output_value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let (traced_output, output_truncated) = truncate_output(&raw_output);

        let status = if is_error { "error" } else { "completed" };
        self.trace_log(
            TraceEventType::ToolResult,
            json!({
                "tool": name,
                "tool_id": tool_use_id,
                "status": status,
                "duration_ms": duration_ms,
                "output": traced_output,
                "output_truncated": output_truncated,
            }),
        );
        self.emit(SseFrame::ToolResult {
            tool_id: tool_use_id.to_owned(),
            status: status.to_owned(),
            output: output_summary.clone(),
            error: is_error.then(|| output_summary),
        })?;

        if was_task {
            self.open_tasks.retain(|open| open != tool_use_id);
            self.current_depth = self.current_depth.saturating_sub(1);
            self.trace_log(
                TraceEventType::AgentComplete,
                json!({ "agent_id": tool_use_id }),
            );
            self.emit(SseFrame::AgentComplete {
                agent_id: tool_use_id.to_owned(),
            })?;
        }

        // Post-tool hook events land right behind the result frame.
        self.flush_hook_events()
    }

    // ── Completion ───────────────────────────────────────────────────────

    fn handle_completion(&mut self, result: TurnResult) -> Result<(), ClientGone> {
        self.flush_hook_events()?;

        let stop_reason = if result.is_error {
            "error"
        } else if result.num_turns >= self.max_turns {
            "max_turns"
        } else {
            "end_turn"
        };
        self.stop_reason = Some(stop_reason.to_owned());

        self.metrics
            .record_tokens(result.usage.input_tokens, result.usage.output_tokens);

        let context_used = result.usage.context_used();
        let context_percent =
            (context_used as f64 / CONTEXT_WINDOW as f64 * 100.0).min(100.0);
        self.trace_log(
            TraceEventType::CostUpdate,
            json!({
                "input_tokens": result.usage.input_tokens,
                "output_tokens": result.usage.output_tokens,
                "cost": result.total_cost_usd,
                "duration_api_ms": result.duration_api_ms,
            }),
        );
        self.emit(SseFrame::CostUpdate {
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
            cost: result.total_cost_usd,
            total_cost: result.total_cost_usd,
            context_used,
            context_max: CONTEXT_WINDOW,
            context_percent,
        })?;

        let total_tokens = result.usage.input_tokens + result.usage.output_tokens;
        self.trace_log(
            TraceEventType::TurnComplete,
            json!({
                "stop_reason": stop_reason,
                "num_turns": result.num_turns,
                "total_tokens": total_tokens,
            }),
        );
        self.emit(SseFrame::MessageComplete {
            tools_used: self.tools_used.clone(),
            total_tokens,
            stop_reason: stop_reason.to_owned(),
            trace_file: self.trace_file.clone(),
        })?;
        self.completed = true;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::hook_queue;
    use crate::runtime::Usage;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        translator: EventTranslator,
        frames: UnboundedReceiver<SseFrame>,
        _tmp: TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let trace = Arc::new(Mutex::new(
            TraceLogger::new("trace_translator", tmp.path()).unwrap(),
        ));
        let metrics = Arc::new(MetricsCollector::new());
        let stamp = metrics.record_request_start();
        let (_hook_tx, hook_rx) = hook_queue();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let translator = EventTranslator::new(
            tx,
            trace,
            metrics,
            stamp,
            hook_rx,
            25,
            "trace_translator.json".to_owned(),
        );
        Fixture {
            translator,
            frames: rx,
            _tmp: tmp,
        }
    }

    fn drain(frames: &mut UnboundedReceiver<SseFrame>) -> Vec<SseFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            out.push(frame);
        }
        out
    }

    fn assistant(blocks: Vec<ContentBlock>) -> RuntimeMessage {
        RuntimeMessage::Assistant(AssistantMessage { content: blocks })
    }

    fn completion(num_turns: u32, is_error: bool) -> RuntimeMessage {
        RuntimeMessage::Completion(TurnResult {
            usage: Usage {
                input_tokens: 100,
                output_tokens: 40,
                ..Default::default()
            },
            total_cost_usd: 0.012,
            num_turns,
            is_error,
            ..Default::default()
        })
    }

    fn tool_use(id: &str, name: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
            input: json!({"pattern": "*.rs"}),
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_owned(),
            content: Some(json!("3 files")),
            is_error: Some(false),
        }
    }

    #[test]
    fn text_only_turn_emits_delta_cost_complete() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "Hello".to_owned(),
            }]))
            .unwrap();
        f.translator.handle_message(completion(1, false)).unwrap();

        let frames = drain(&mut f.frames);
        let names: Vec<&str> = frames.iter().map(|f| f.event_name()).collect();
        assert_eq!(names, vec!["text_delta", "cost_update", "message_complete"]);
        assert!(f.translator.is_complete());
        assert_eq!(f.translator.stop_reason(), Some("end_turn"));
        let SseFrame::MessageComplete { tools_used, total_tokens, .. } = &frames[2] else {
            panic!("expected message_complete");
        };
        assert!(tools_used.is_empty());
        assert_eq!(*total_tokens, 140);
    }

    #[test]
    fn cumulative_text_emits_only_the_suffix() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "Hello".to_owned(),
            }]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "Hello, world".to_owned(),
            }]))
            .unwrap();
        let frames = drain(&mut f.frames);
        assert_eq!(
            frames,
            vec![
                SseFrame::TextDelta { text: "Hello".to_owned() },
                SseFrame::TextDelta { text: ", world".to_owned() },
            ]
        );
    }

    #[test]
    fn single_tool_lifecycle() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_use("t1", "Glob")]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![tool_result("t1")]))
            .unwrap();
        f.translator.handle_message(completion(1, false)).unwrap();

        let frames = drain(&mut f.frames);
        let names: Vec<&str> = frames.iter().map(|f| f.event_name()).collect();
        assert_eq!(
            names,
            vec!["tool_start", "tool_result", "cost_update", "message_complete"]
        );
        let SseFrame::ToolStart { iteration, .. } = &frames[0] else {
            panic!("expected tool_start");
        };
        assert_eq!(*iteration, 1);
        let SseFrame::MessageComplete { tools_used, .. } = &frames[3] else {
            panic!("expected message_complete");
        };
        assert_eq!(tools_used, &vec!["Glob".to_owned()]);
    }

    #[test]
    fn parallel_tools_share_a_group_and_iteration() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_use("t1", "Read"), tool_use("t2", "Read")]))
            .unwrap();
        let group1 = f.translator.tool_states["t1"].parallel_group.clone();
        let group2 = f.translator.tool_states["t2"].parallel_group.clone();
        assert!(group1.is_some());
        assert_eq!(group1, group2);
        assert_eq!(f.translator.tool_states["t1"].iteration, 1);
        assert_eq!(f.translator.tool_states["t2"].iteration, 1);
    }

    #[test]
    fn solo_tool_has_no_parallel_group() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_use("t1", "Read")]))
            .unwrap();
        assert_eq!(f.translator.tool_states["t1"].parallel_group, None);
    }

    #[test]
    fn iteration_increments_after_text() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_use("t1", "Glob")]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![tool_result("t1")]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "found some".to_owned(),
            }]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![tool_use("t2", "Read")]))
            .unwrap();
        assert_eq!(f.translator.tool_states["t1"].iteration, 1);
        assert_eq!(f.translator.tool_states["t2"].iteration, 2);
    }

    #[test]
    fn task_spawns_nested_agent_frames() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![ContentBlock::ToolUse {
                id: "task1".to_owned(),
                name: "Task".to_owned(),
                input: json!({"subagent_type": "researcher", "description": "dig"}),
            }]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![tool_result("task1")]))
            .unwrap();

        let frames = drain(&mut f.frames);
        let names: Vec<&str> = frames.iter().map(|f| f.event_name()).collect();
        assert_eq!(names, vec!["agent_spawn", "tool_result", "agent_complete"]);
        let SseFrame::AgentSpawn { depth, agent_type, parent_tool_id, .. } = &frames[0] else {
            panic!("expected agent_spawn");
        };
        assert_eq!(*depth, 1);
        assert_eq!(agent_type, "researcher");
        assert_eq!(*parent_tool_id, None);
        assert_eq!(f.translator.current_depth, 0);
    }

    #[test]
    fn nested_tasks_report_parent_and_depth() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![ContentBlock::ToolUse {
                id: "outer".to_owned(),
                name: "Task".to_owned(),
                input: json!({}),
            }]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![ContentBlock::ToolUse {
                id: "inner".to_owned(),
                name: "Task".to_owned(),
                input: json!({}),
            }]))
            .unwrap();
        let frames = drain(&mut f.frames);
        let SseFrame::AgentSpawn { depth, parent_tool_id, .. } = &frames[1] else {
            panic!("expected agent_spawn");
        };
        assert_eq!(*depth, 2);
        assert_eq!(parent_tool_id.as_deref(), Some("outer"));
    }

    #[test]
    fn error_result_reports_error_status() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_use("t1", "Bash")]))
            .unwrap();
        f.translator
            .handle_message(assistant(vec![ContentBlock::ToolResult {
                tool_use_id: "t1".to_owned(),
                content: Some(json!("command not found")),
                is_error: Some(true),
            }]))
            .unwrap();
        let frames = drain(&mut f.frames);
        let SseFrame::ToolResult { status, error, .. } = &frames[1] else {
            panic!("expected tool_result");
        };
        assert_eq!(status, "error");
        assert!(error.is_some());
    }

    #[test]
    fn max_turns_stop_reason() {
        let mut f = fixture();
        f.translator.handle_message(completion(25, false)).unwrap();
        assert_eq!(f.translator.stop_reason(), Some("max_turns"));
    }

    #[test]
    fn runtime_error_stop_reason() {
        let mut f = fixture();
        f.translator.handle_message(completion(1, true)).unwrap();
        assert_eq!(f.translator.stop_reason(), Some("error"));
    }

    #[test]
    fn replacement_runs_never_reach_the_stream() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "ok\u{FFFD}\u{FFFD}fine".to_owned(),
            }]))
            .unwrap();
        let frames = drain(&mut f.frames);
        let SseFrame::TextDelta { text } = &frames[0] else {
            panic!("expected text_delta");
        };
        assert_eq!(text, "okfine");
    }

    #[test]
    fn orphan_tool_result_is_ignored() {
        let mut f = fixture();
        f.translator
            .handle_message(assistant(vec![tool_result("ghost")]))
            .unwrap();
        assert!(drain(&mut f.frames).is_empty());
    }

    #[test]
    fn client_gone_when_receiver_dropped() {
        let mut f = fixture();
        drop(f.frames);
        let result = f
            .translator
            .handle_message(assistant(vec![ContentBlock::Text {
                text: "anyone there?".to_owned(),
            }]));
        assert_eq!(result, Err(ClientGone));
    }

    #[test]
    fn unknown_message_traces_and_continues() {
        let mut f = fixture();
        f.translator
            .handle_message(RuntimeMessage::Unknown(json!({"type": "telemetry"})))
            .unwrap();
        assert!(drain(&mut f.frames).is_empty());
        assert!(!f.translator.is_complete());
    }
}
