//! Production [`AgentRuntime`]: drives the agent CLI as a subprocess
//! speaking newline-delimited JSON over stdin/stdout.
//!
//! The adapter owns both callback surfaces. When an assistant message
//! announces tool uses, the pre-tool hook chain and the permission callback
//! run before the message is forwarded downstream, and the decision is
//! cached per `tool_use_id`. The child's `control_request` lines
//! (`can_use_tool`, `hook_callback`) are answered from that cache, and
//! tool results for blocked invocations are swallowed so a denied tool
//! never produces a `tool_result`.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    AgentOptions, AgentRuntime, ContentBlock, HookContext, HookDecision, HookInput,
    MessageStream, PermissionContext, PermissionDecision, PromptEnvelope, RuntimeError,
    RuntimeMessage,
};

pub struct ProcessRuntime {
    command: Vec<String>,
}

impl ProcessRuntime {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AgentRuntime for ProcessRuntime {
    async fn open_stream(
        &self,
        prompt: Vec<PromptEnvelope>,
        options: AgentOptions,
    ) -> Result<MessageStream, RuntimeError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| RuntimeError::Connection("runtime command is empty".to_owned()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Connection(format!("failed to spawn {program:?}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Connection("child stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Connection("child stdout unavailable".to_owned()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "runtime", "stderr: {line}");
                }
            });
        }

        // Handshake: wire config, then the prompt envelopes.
        write_line(&mut stdin, &json!({"type": "configure", "options": options.wire_config()}))
            .await?;
        for envelope in &prompt {
            write_line(
                &mut stdin,
                &json!({"type": "user", "message": {"role": envelope.role, "content": envelope.content}}),
            )
            .await?;
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drive_child(child, stdin, stdout, options, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn write_line(stdin: &mut ChildStdin, value: &Value) -> Result<(), RuntimeError> {
    let mut line = value.to_string();
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| RuntimeError::Io(format!("write to runtime failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| RuntimeError::Io(format!("flush to runtime failed: {e}")))
}

/// Read loop: parses child output, services control requests, runs the
/// hook/permission surfaces, and forwards messages downstream.
async fn drive_child(
    mut child: Child,
    mut stdin: ChildStdin,
    stdout: tokio::process::ChildStdout,
    options: AgentOptions,
    tx: mpsc::Sender<Result<RuntimeMessage, RuntimeError>>,
) {
    let mut gate = ToolGate::new(&options);
    let mut lines = BufReader::new(stdout).lines();
    let mut completed = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(RuntimeError::Io(e.to_string()))).await;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(target: "runtime", "skipping non-JSON line: {e}");
                continue;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("control_request") {
            if let Some(response) = gate.answer_control(&value) {
                if write_line(&mut stdin, &response).await.is_err() {
                    break;
                }
            }
            continue;
        }

        let message = RuntimeMessage::parse(value);
        let message = match message {
            RuntimeMessage::Assistant(assistant) => match gate.intercept(assistant) {
                Some(filtered) => RuntimeMessage::Assistant(filtered),
                None => continue,
            },
            RuntimeMessage::Completion(result) => {
                completed = true;
                RuntimeMessage::Completion(result)
            }
            other => other,
        };
        if tx.send(Ok(message)).await.is_err() {
            // Consumer went away (client disconnect); stop the child.
            break;
        }
        if completed {
            break;
        }
    }

    if !completed && !tx.is_closed() {
        let _ = tx
            .send(Err(RuntimeError::Terminated(
                "runtime exited before the turn completed".to_owned(),
            )))
            .await;
    }
    let _ = child.kill().await;
}

// ─── ToolGate ────────────────────────────────────────────────────────────────

/// Runs the pre/post hook chains and the permission callback, caching one
/// decision per `tool_use_id`.
struct ToolGate {
    options: AgentOptions,
    context: HookContext,
    tool_info: HashMap<String, (String, Value)>,
    blocked: HashSet<String>,
    decisions: HashMap<String, PermissionDecision>,
}

impl ToolGate {
    fn new(options: &AgentOptions) -> Self {
        Self {
            options: options.clone(),
            context: HookContext::default(),
            tool_info: HashMap::new(),
            blocked: HashSet::new(),
            decisions: HashMap::new(),
        }
    }

    /// Apply both enforcement surfaces to an assistant message, dropping
    /// tool results of blocked invocations. Returns `None` when nothing
    /// remains to forward.
    fn intercept(&mut self, message: super::AssistantMessage) -> Option<super::AssistantMessage> {
        let mut kept = Vec::with_capacity(message.content.len());
        for block in message.content {
            match &block {
                ContentBlock::ToolUse { id, name, input } => {
                    self.tool_info
                        .insert(id.clone(), (name.clone(), input.clone()));
                    let decision = self.decide(id, name, input);
                    if let PermissionDecision::Deny { .. } = decision {
                        self.blocked.insert(id.clone());
                    }
                    kept.push(block);
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if self.blocked.contains(tool_use_id) {
                        continue;
                    }
                    let response = json!({
                        "content": content.clone().unwrap_or(Value::Null),
                        "is_error": is_error.unwrap_or(false),
                    });
                    self.run_post_hooks(tool_use_id, response);
                    kept.push(block);
                }
                _ => kept.push(block),
            }
        }
        if kept.is_empty() {
            return None;
        }
        Some(super::AssistantMessage { content: kept })
    }

    /// Pre-tool hook chain first (first block wins), then the synchronous
    /// permission callback. The result is cached for control requests.
    fn decide(&mut self, tool_use_id: &str, name: &str, input: &Value) -> PermissionDecision {
        if let Some(cached) = self.decisions.get(tool_use_id) {
            return cached.clone();
        }
        let hook_input = HookInput {
            tool_name: name.to_owned(),
            tool_input: input.clone(),
            tool_response: None,
        };
        let mut decision = PermissionDecision::Allow;
        for hook in &self.options.pre_tool_hooks {
            match (hook.callback)(&hook_input, Some(tool_use_id), &self.context) {
                HookDecision::Block { reason } => {
                    decision = PermissionDecision::Deny {
                        message: reason,
                        interrupt: false,
                    };
                    break;
                }
                HookDecision::Continue | HookDecision::KeepStreamOpen => {}
            }
        }
        if decision == PermissionDecision::Allow {
            if let Some(callback) = &self.options.permission_callback {
                let ctx = PermissionContext {
                    tool_use_id: Some(tool_use_id.to_owned()),
                };
                decision = callback(name, input, &ctx);
            }
        }
        self.decisions
            .insert(tool_use_id.to_owned(), decision.clone());
        decision
    }

    fn run_post_hooks(&mut self, tool_use_id: &str, response: Value) {
        let Some((name, input)) = self.tool_info.get(tool_use_id).cloned() else {
            return;
        };
        let hook_input = HookInput {
            tool_name: name,
            tool_input: input,
            tool_response: Some(response),
        };
        for hook in &self.options.post_tool_hooks {
            let _ = (hook.callback)(&hook_input, Some(tool_use_id), &self.context);
        }
    }

    /// Answer a `control_request` line from the cached decisions.
    fn answer_control(&mut self, request: &Value) -> Option<Value> {
        let request_id = request.get("request_id")?.clone();
        let body = request.get("request")?;
        let subtype = body.get("subtype").and_then(Value::as_str)?;
        let response = match subtype {
            "can_use_tool" => {
                let name = body.get("tool_name").and_then(Value::as_str).unwrap_or("");
                let input = body.get("input").cloned().unwrap_or(Value::Null);
                let id = body
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                match self.decide(&id, name, &input) {
                    PermissionDecision::Allow => json!({"behavior": "allow"}),
                    PermissionDecision::Deny { message, interrupt } => {
                        json!({"behavior": "deny", "message": message, "interrupt": interrupt})
                    }
                }
            }
            "hook_callback" => {
                let id = body.get("tool_use_id").and_then(Value::as_str).unwrap_or("");
                if self.blocked.contains(id) {
                    json!({"decision": "block", "reason": "blocked by sandbox policy"})
                } else {
                    json!({})
                }
            }
            _ => json!({}),
        };
        Some(json!({
            "type": "control_response",
            "request_id": request_id,
            "response": response,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{AssistantMessage, NamedHook};
    use std::sync::{Arc, Mutex};

    fn tool_use(id: &str, name: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
            input: json!({"file_path": "/x"}),
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_owned(),
            content: Some(json!("ok")),
            is_error: Some(false),
        }
    }

    fn blocking_hook() -> NamedHook {
        NamedHook::new(
            "sandbox_guard",
            Arc::new(|input: &HookInput, _, _| {
                if input.tool_name == "Write" {
                    HookDecision::Block {
                        reason: "nope".to_owned(),
                    }
                } else {
                    HookDecision::Continue
                }
            }),
        )
    }

    #[test]
    fn gate_blocks_and_swallows_result() {
        let options = AgentOptions {
            pre_tool_hooks: vec![blocking_hook()],
            ..Default::default()
        };
        let mut gate = ToolGate::new(&options);

        let first = gate
            .intercept(AssistantMessage {
                content: vec![tool_use("t1", "Write")],
            })
            .expect("tool use is forwarded");
        assert_eq!(first.content.len(), 1);
        assert!(gate.blocked.contains("t1"));

        // The result for the blocked invocation is swallowed entirely.
        assert!(gate
            .intercept(AssistantMessage {
                content: vec![tool_result("t1")],
            })
            .is_none());
    }

    #[test]
    fn gate_allows_and_runs_post_hooks() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let post = NamedHook::new(
            "observer",
            Arc::new(move |input: &HookInput, _, _| {
                seen_clone.lock().expect("lock").push(input.tool_name.clone());
                HookDecision::Continue
            }),
        );
        let options = AgentOptions {
            post_tool_hooks: vec![post],
            ..Default::default()
        };
        let mut gate = ToolGate::new(&options);
        gate.intercept(AssistantMessage {
            content: vec![tool_use("t1", "Glob")],
        });
        gate.intercept(AssistantMessage {
            content: vec![tool_result("t1")],
        });
        assert_eq!(*seen.lock().expect("lock"), vec!["Glob".to_owned()]);
    }

    #[test]
    fn permission_callback_runs_after_hooks_allow() {
        let options = AgentOptions {
            permission_callback: Some(Arc::new(|name: &str, _: &Value, _: &PermissionContext| {
                if name == "Bash" {
                    PermissionDecision::Deny {
                        message: "no shell".to_owned(),
                        interrupt: false,
                    }
                } else {
                    PermissionDecision::Allow
                }
            })),
            ..Default::default()
        };
        let mut gate = ToolGate::new(&options);
        gate.intercept(AssistantMessage {
            content: vec![tool_use("t1", "Bash")],
        });
        assert!(gate.blocked.contains("t1"));
    }

    #[test]
    fn decision_is_cached_per_tool_use() {
        let calls = Arc::new(Mutex::new(0usize));
        let calls_clone = calls.clone();
        let options = AgentOptions {
            permission_callback: Some(Arc::new(move |_: &str, _: &Value, _: &PermissionContext| {
                *calls_clone.lock().expect("lock") += 1;
                PermissionDecision::Allow
            })),
            ..Default::default()
        };
        let mut gate = ToolGate::new(&options);
        gate.intercept(AssistantMessage {
            content: vec![tool_use("t1", "Read")],
        });
        // A later control request for the same id reuses the cache.
        let response = gate
            .answer_control(&json!({
                "type": "control_request",
                "request_id": 7,
                "request": {"subtype": "can_use_tool", "tool_name": "Read", "input": {}, "tool_use_id": "t1"},
            }))
            .expect("response");
        assert_eq!(response["response"]["behavior"], "allow");
        assert_eq!(*calls.lock().expect("lock"), 1);
    }

    #[test]
    fn control_response_for_blocked_hook() {
        let options = AgentOptions {
            pre_tool_hooks: vec![blocking_hook()],
            ..Default::default()
        };
        let mut gate = ToolGate::new(&options);
        gate.intercept(AssistantMessage {
            content: vec![tool_use("t9", "Write")],
        });
        let response = gate
            .answer_control(&json!({
                "type": "control_request",
                "request_id": "r1",
                "request": {"subtype": "hook_callback", "tool_use_id": "t9"},
            }))
            .expect("response");
        assert_eq!(response["response"]["decision"], "block");
    }
}
