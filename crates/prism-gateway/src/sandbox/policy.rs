//! Sandbox policy: pure rules over tool invocations.
//!
//! The policy performs no I/O. `..` is resolved lexically, symlinks are
//! never followed, and wall-clock time is injected so the rate windows are
//! testable.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SandboxSettings;

use super::paths::{
    contained_in_roots, is_sensitive_basename, normalize_lexical, CommandPathPatterns,
};

// ─── Decision ────────────────────────────────────────────────────────────────

/// Why an invocation was denied. Serialized as the `reason` code in trace
/// events and `hook_pre_tool` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RateLimitExceeded,
    PathBlacklist,
    PathNotInWhitelist,
    ExtensionBlocked,
    SensitiveContent,
    PathTraversal,
    DangerousCommand,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PathBlacklist => "path_blacklist",
            Self::PathNotInWhitelist => "path_not_in_whitelist",
            Self::ExtensionBlocked => "extension_blocked",
            Self::SensitiveContent => "sensitive_content",
            Self::PathTraversal => "path_traversal",
            Self::DangerousCommand => "dangerous_command",
        }
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason, message: String },
}

impl Decision {
    fn deny(reason: DenyReason, message: impl Into<String>) -> Self {
        Self::Deny {
            reason,
            message: message.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

// ─── Rate windows ────────────────────────────────────────────────────────────

struct SlidingWindow {
    window: Duration,
    cap: usize,
    stamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    fn new(cap: usize) -> Self {
        Self {
            window: Duration::from_secs(60),
            cap,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Prune expired stamps, then record `now` if under the cap.
    /// Returns `false` when the cap is already reached.
    fn try_record(&self, now: Instant) -> bool {
        let mut stamps = self.stamps.lock().expect("rate window lock poisoned");
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= self.cap {
            return false;
        }
        stamps.push_back(now);
        true
    }
}

// ─── SandboxPolicy ───────────────────────────────────────────────────────────

/// Immutable, compiled policy configuration.
pub struct SandboxPolicy {
    allowed_roots: Vec<PathBuf>,
    blocked_globs: GlobSet,
    allowed_extensions: Vec<String>,
    blocked_extensions: Vec<String>,
    dangerous_commands: RegexSet,
    sensitive_content: RegexSet,
    command_paths: CommandPathPatterns,
    max_ops_per_min: usize,
    max_writes_per_min: usize,
    max_shell_per_min: usize,
}

impl SandboxPolicy {
    /// Compile the policy from config. Invalid globs or regexes are a
    /// configuration error.
    pub fn compile(settings: &SandboxSettings) -> Result<Self, String> {
        let mut roots = vec![normalize_lexical(&settings.root)];
        roots.extend(settings.extra_roots.iter().map(|r| normalize_lexical(r)));

        let mut globs = GlobSetBuilder::new();
        for pattern in &settings.blocked_path_globs {
            let glob = Glob::new(pattern)
                .map_err(|e| format!("invalid blocked path glob {pattern:?}: {e}"))?;
            globs.add(glob);
        }
        let blocked_globs = globs
            .build()
            .map_err(|e| format!("failed to build glob set: {e}"))?;

        let dangerous: Vec<String> = settings
            .dangerous_command_regexes
            .iter()
            .map(|r| format!("(?i){r}"))
            .collect();
        let dangerous_commands = RegexSet::new(&dangerous)
            .map_err(|e| format!("invalid dangerous command regex: {e}"))?;
        let sensitive_content = RegexSet::new(&settings.sensitive_content_regexes)
            .map_err(|e| format!("invalid sensitive content regex: {e}"))?;

        Ok(Self {
            allowed_roots: roots,
            blocked_globs,
            allowed_extensions: lowercase_all(&settings.allowed_extensions),
            blocked_extensions: lowercase_all(&settings.blocked_extensions),
            dangerous_commands,
            sensitive_content,
            command_paths: CommandPathPatterns::new(),
            max_ops_per_min: settings.max_ops_per_min,
            max_writes_per_min: settings.max_writes_per_min,
            max_shell_per_min: settings.max_shell_per_min,
        })
    }

    /// The first configured write root; artifact URLs are derived from it.
    pub fn primary_root(&self) -> &Path {
        &self.allowed_roots[0]
    }

    fn path_in_roots(&self, path: &Path) -> bool {
        contained_in_roots(path, &self.allowed_roots)
    }

    /// Match the blocked globs against absolute, root-relative, and
    /// basename forms of `path`.
    fn path_blacklisted(&self, path: &Path) -> bool {
        if self.blocked_globs.is_match(path) {
            return true;
        }
        let normalized = normalize_lexical(path);
        for root in &self.allowed_roots {
            if let Ok(rel) = normalized.strip_prefix(root) {
                if self.blocked_globs.is_match(rel) {
                    return true;
                }
            }
        }
        match normalized.file_name() {
            Some(name) => self.blocked_globs.is_match(Path::new(name)),
            None => false,
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if self.blocked_extensions.contains(&ext) {
            return false;
        }
        if !self.allowed_extensions.is_empty() && !self.allowed_extensions.contains(&ext) {
            return false;
        }
        true
    }
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

// ─── SandboxChecker ──────────────────────────────────────────────────────────

/// Tool families with distinct rule sets.
enum ToolFamily {
    Read,
    Write,
    Shell,
    Spawn,
    Other,
}

fn family_of(tool_name: &str) -> ToolFamily {
    match tool_name {
        "Read" | "Glob" | "Grep" => ToolFamily::Read,
        "Write" | "Edit" => ToolFamily::Write,
        "Bash" => ToolFamily::Shell,
        "Task" => ToolFamily::Spawn,
        _ => ToolFamily::Other,
    }
}

/// Per-turn policy checker: the immutable compiled policy plus this turn's
/// rolling rate windows.
pub struct SandboxChecker {
    policy: std::sync::Arc<SandboxPolicy>,
    ops_window: SlidingWindow,
    writes_window: SlidingWindow,
    shell_window: SlidingWindow,
}

impl SandboxChecker {
    pub fn new(policy: std::sync::Arc<SandboxPolicy>) -> Self {
        let ops = policy.max_ops_per_min;
        let writes = policy.max_writes_per_min;
        let shell = policy.max_shell_per_min;
        Self {
            policy,
            ops_window: SlidingWindow::new(ops),
            writes_window: SlidingWindow::new(writes),
            shell_window: SlidingWindow::new(shell),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Check one tool invocation against the policy.
    pub fn check(&self, tool_name: &str, tool_input: &Value) -> Decision {
        self.check_at(tool_name, tool_input, Instant::now())
    }

    /// Same as [`check`], with the clock injected.
    pub fn check_at(&self, tool_name: &str, tool_input: &Value, now: Instant) -> Decision {
        let family = family_of(tool_name);

        // 1. Rate limits, first failure wins.
        if !self.ops_window.try_record(now) {
            return Decision::deny(
                DenyReason::RateLimitExceeded,
                format!("operation rate cap ({}/min) reached", self.policy.max_ops_per_min),
            );
        }
        match family {
            ToolFamily::Write => {
                if !self.writes_window.try_record(now) {
                    return Decision::deny(
                        DenyReason::RateLimitExceeded,
                        format!("write rate cap ({}/min) reached", self.policy.max_writes_per_min),
                    );
                }
            }
            ToolFamily::Shell => {
                if !self.shell_window.try_record(now) {
                    return Decision::deny(
                        DenyReason::RateLimitExceeded,
                        format!("shell rate cap ({}/min) reached", self.policy.max_shell_per_min),
                    );
                }
            }
            _ => {}
        }

        match family {
            ToolFamily::Read => self.check_read(tool_input),
            ToolFamily::Write => self.check_write(tool_name, tool_input),
            ToolFamily::Shell => self.check_shell(tool_input),
            ToolFamily::Spawn | ToolFamily::Other => Decision::Allow,
        }
    }

    // ── Read family ──────────────────────────────────────────────────────

    fn check_read(&self, input: &Value) -> Decision {
        for key in ["file_path", "path", "pattern"] {
            if let Some(raw) = input.get(key).and_then(Value::as_str) {
                if is_sensitive_basename(raw) {
                    return Decision::deny(
                        DenyReason::PathBlacklist,
                        format!("'{raw}' names a sensitive file"),
                    );
                }
            }
        }
        Decision::Allow
    }

    // ── Write family ─────────────────────────────────────────────────────

    fn check_write(&self, tool_name: &str, input: &Value) -> Decision {
        let Some(raw) = input.get("file_path").and_then(Value::as_str) else {
            return Decision::deny(
                DenyReason::PathNotInWhitelist,
                "write call carries no file_path",
            );
        };
        let path = Path::new(raw);

        if !self.policy.path_in_roots(path) {
            return Decision::deny(
                DenyReason::PathNotInWhitelist,
                format!("'{raw}' is outside the sandbox roots"),
            );
        }
        if self.policy.path_blacklisted(path) {
            return Decision::deny(
                DenyReason::PathBlacklist,
                format!("'{raw}' matches a blocked path pattern"),
            );
        }
        if !self.policy.extension_allowed(path) {
            return Decision::deny(
                DenyReason::ExtensionBlocked,
                format!("extension of '{raw}' is not permitted"),
            );
        }
        if tool_name == "Write" {
            if let Some(content) = input.get("content").and_then(Value::as_str) {
                if self.policy.sensitive_content.is_match(content) {
                    return Decision::deny(
                        DenyReason::SensitiveContent,
                        "write payload matches a sensitive content pattern",
                    );
                }
            }
        }
        Decision::Allow
    }

    // ── Shell ────────────────────────────────────────────────────────────

    fn check_shell(&self, input: &Value) -> Decision {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if command.contains("../") || command.contains("..\\") {
            return Decision::deny(
                DenyReason::PathTraversal,
                "command contains a path traversal sequence",
            );
        }
        if let Some(idx) = self.policy.dangerous_commands.matches(command).iter().next() {
            return Decision::deny(
                DenyReason::DangerousCommand,
                format!("command matches dangerous pattern #{idx}"),
            );
        }
        for path in self.policy.command_paths.extract(command) {
            if !self.policy.path_in_roots(&path) {
                return Decision::deny(
                    DenyReason::PathNotInWhitelist,
                    format!("command references '{}' outside the sandbox roots", path.display()),
                );
            }
        }
        Decision::Allow
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
