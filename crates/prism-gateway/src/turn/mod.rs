//! Turn coordinator: one invocation per HTTP chat turn.
//!
//! Builds the per-turn state (trace logger, hook queue, pending-artifact
//! map, sandbox checker), wires the callbacks into the runtime options,
//! opens the inbound stream with retry, drives the translator, and
//! finalizes trace and metrics no matter how the turn ends. The outbound
//! stream always terminates with `message_complete` or `error`.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::{
    config::{AppConfig, child_env},
    hooks::{HookPipeline, PendingArtifacts, hook_queue},
    metrics::MetricsCollector,
    runtime::{AgentOptions, AgentRuntime, PermissionMode, PromptEnvelope, RuntimeError},
    sandbox::{SandboxChecker, SandboxPolicy},
    trace::{TraceEventType, TraceLogger},
    translator::{EventTranslator, MAX_RETRIES, SseFrame, open_with_retry},
};

/// Base system prompt composed into every turn.
const SYSTEM_PREAMBLE: &str = "You are an agent working inside a sandboxed workspace. \
All files you create must live under the sandbox directory. \
Use the provided search tools instead of built-in web search.";

// ─── Request shape ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    /// Extended-thinking variant: same pipeline, thinking model id.
    #[serde(default)]
    pub thinking: bool,
}

/// Identifiers surfaced as response headers before the stream starts.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    pub trace_id: String,
    pub session_id: String,
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct TurnCoordinator {
    runtime: Arc<dyn AgentRuntime>,
    metrics: Arc<MetricsCollector>,
    policy: Arc<SandboxPolicy>,
    config: Arc<AppConfig>,
}

impl TurnCoordinator {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        metrics: Arc<MetricsCollector>,
        policy: Arc<SandboxPolicy>,
        config: Arc<AppConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            metrics,
            policy,
            config,
        })
    }

    /// Start one turn. Returns the identifiers plus the frame stream; the
    /// turn itself runs as a detached task and ends when the receiver is
    /// dropped or the runtime completes.
    pub fn begin(self: &Arc<Self>, request: TurnRequest) -> (TurnHandle, UnboundedReceiver<SseFrame>) {
        let trace_id = TraceLogger::generate_id();
        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let handle = TurnHandle {
            trace_id: trace_id.clone(),
            session_id: session_id.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_turn(request, trace_id, session_id, tx).await;
        });
        (handle, rx)
    }

    #[tracing::instrument(name = "turn", skip_all, fields(trace_id = %trace_id, session_id = %session_id))]
    async fn run_turn(
        self: Arc<Self>,
        request: TurnRequest,
        trace_id: String,
        session_id: String,
        tx: UnboundedSender<SseFrame>,
    ) {
        let stamp = self.metrics.record_request_start();

        let trace = match TraceLogger::new(&trace_id, &self.config.trace.dir) {
            Ok(logger) => Arc::new(Mutex::new(logger)),
            Err(e) => {
                tracing::error!("could not open trace file: {e}");
                self.metrics.record_error("trace_store");
                self.metrics.record_request_complete(&stamp, false);
                let _ = tx.send(SseFrame::Error {
                    error: "trace_store".to_owned(),
                    details: e.to_string(),
                    trace_file: None,
                });
                return;
            }
        };
        let trace_file = trace.lock().expect("trace lock poisoned").file_name();
        trace.lock().expect("trace lock poisoned").log(
            TraceEventType::TurnStart,
            json!({
                "session_id": session_id,
                "thinking": request.thinking,
                "message_chars": request.message.chars().count(),
            }),
        );

        // Per-turn enforcement state.
        let checker = Arc::new(SandboxChecker::new(Arc::clone(&self.policy)));
        let (hook_tx, hook_rx) = hook_queue();
        let artifacts = Arc::new(PendingArtifacts::default());
        let pipeline = HookPipeline::new(
            checker,
            Arc::clone(&trace),
            hook_tx,
            artifacts,
            self.config.sandbox.enabled,
        );

        let _ = tx.send(SseFrame::SessionConfig {
            max_turns: self.config.agent.max_turns,
            permission_mode: PermissionMode::Default.as_str().to_owned(),
            sandbox_enabled: self.config.sandbox.enabled,
            sandbox_root: self.config.sandbox.root.display().to_string(),
        });

        let options = self.build_options(&request, &pipeline);
        let prompt = vec![PromptEnvelope::user(compose_prompt(&request))];

        let mut translator = EventTranslator::new(
            tx.clone(),
            Arc::clone(&trace),
            Arc::clone(&self.metrics),
            stamp,
            hook_rx,
            self.config.agent.max_turns,
            trace_file.clone(),
        );

        // Open the inbound stream, surfacing each recovery attempt.
        let trace_for_retry = Arc::clone(&trace);
        let tx_for_retry = tx.clone();
        let opened = open_with_retry(self.runtime.as_ref(), &prompt, &options, |attempt, delay, error| {
            trace_for_retry.lock().expect("trace lock poisoned").log(
                TraceEventType::Retry,
                json!({
                    "attempt": format!("{attempt}/{MAX_RETRIES}"),
                    "delay_secs": delay.as_secs(),
                    "error": error.to_string(),
                }),
            );
            let _ = tx_for_retry.send(SseFrame::TextDelta {
                text: format!(
                    "[connection interrupted, retry {attempt}/{MAX_RETRIES} in {}s]\n",
                    delay.as_secs()
                ),
            });
        })
        .await;

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.finalize_error(&trace, &tx, &stamp, &trace_file, &e);
                return;
            }
        };

        // Drive the translator until completion, upstream error, or client
        // disconnect.
        let mut client_gone = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    if translator.handle_message(message).is_err() {
                        client_gone = true;
                        break;
                    }
                    if translator.is_complete() {
                        break;
                    }
                }
                Err(e) => {
                    self.finalize_error(&trace, &tx, &stamp, &trace_file, &e);
                    return;
                }
            }
        }
        // Dropping the stream aborts the inbound consumer and the runtime
        // subprocess with it.
        drop(stream);

        if client_gone {
            tracing::info!("client disconnected mid-turn");
            trace
                .lock()
                .expect("trace lock poisoned")
                .log(TraceEventType::RuntimeMessage, json!({ "kind": "client_disconnected" }));
            trace.lock().expect("trace lock poisoned").complete();
            self.metrics.record_request_complete(&stamp, false);
            return;
        }

        if !translator.is_complete() {
            let e = RuntimeError::Terminated("stream ended without a completion message".to_owned());
            self.finalize_error(&trace, &tx, &stamp, &trace_file, &e);
            return;
        }

        trace.lock().expect("trace lock poisoned").complete();
        self.metrics.record_request_complete(&stamp, true);
    }

    fn build_options(&self, request: &TurnRequest, pipeline: &Arc<HookPipeline>) -> AgentOptions {
        let model = if request.thinking {
            self.config.agent.model_thinking.clone()
        } else {
            self.config.agent.model.clone()
        };
        AgentOptions {
            model,
            system_prompt: SYSTEM_PREAMBLE.to_owned(),
            allowed_tools: vec![
                "Read".to_owned(),
                "Glob".to_owned(),
                "Grep".to_owned(),
                "Write".to_owned(),
                "Edit".to_owned(),
                "Bash".to_owned(),
                "Task".to_owned(),
                "WebFetch".to_owned(),
                "mcp__tavily__search".to_owned(),
                "mcp__tavily__extract".to_owned(),
            ],
            // The runtime's built-in web search is unavailable in the
            // target deployment; the agent goes through /api/search.
            disallowed_tools: vec!["WebSearch".to_owned()],
            mcp_servers: self.config.agent.mcp_servers.clone(),
            permission_mode: PermissionMode::Default,
            max_turns: self.config.agent.max_turns,
            cwd: self
                .config
                .agent
                .cwd
                .clone()
                .or_else(|| Some(self.config.sandbox.root.clone())),
            env: child_env(&self.config),
            permission_callback: Some(pipeline.permission_callback()),
            pre_tool_hooks: vec![pipeline.keep_stream_open_hook(), pipeline.pre_tool_hook()],
            post_tool_hooks: vec![pipeline.post_tool_hook()],
        }
    }

    fn finalize_error(
        &self,
        trace: &Arc<Mutex<TraceLogger>>,
        tx: &UnboundedSender<SseFrame>,
        stamp: &crate::metrics::RequestStamp,
        trace_file: &str,
        error: &RuntimeError,
    ) {
        tracing::error!("turn failed: {error}");
        self.metrics.record_error(error.kind());
        self.metrics.record_request_complete(stamp, false);
        {
            let mut trace = trace.lock().expect("trace lock poisoned");
            trace.log_error(error.kind(), &error.to_string());
            trace.complete();
        }
        let _ = tx.send(SseFrame::Error {
            error: error.kind().to_owned(),
            details: error.to_string(),
            trace_file: Some(trace_file.to_owned()),
        });
    }
}

/// Flatten prior turns into a summary block ahead of the current message.
/// Stream mode accepts only user-typed envelopes, so history cannot be
/// replayed as separate messages.
fn compose_prompt(request: &TurnRequest) -> String {
    if request.history.is_empty() {
        return request.message.clone();
    }
    let mut text = String::from("Previous conversation:\n");
    for turn in &request.history {
        let line = turn.content.replace('\n', " ");
        let clipped: String = line.chars().take(200).collect();
        text.push_str(&format!("- {}: {clipped}\n", turn.role));
    }
    text.push_str("\nCurrent message:\n");
    text.push_str(&request.message);
    text
}
