//! Configuration schema for the gateway.
//!
//! All sections have `#[serde(default)]` so a partially-filled config file
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `prism.toml`:
//! ```toml
//! [server]
//! addr = "127.0.0.1:8000"
//! ui_origin = "http://localhost:5173"
//!
//! [agent]
//! model = "claude-sonnet-4-5"
//! max_turns = 25
//! runtime_command = ["claude"]
//!
//! [sandbox]
//! root = "./sandbox"
//! max_writes_per_min = 20
//!
//! [trace]
//! dir = "./traces"
//! ```

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::runtime::McpServerConfig;

// ─── ServerConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP daemon binds to.
    pub addr: String,
    /// Browser UI origin allowed by CORS (credentials enabled).
    pub ui_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_owned(),
            ui_origin: "http://localhost:5173".to_owned(),
        }
    }
}

// ─── AgentConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier for normal turns.
    pub model: String,
    /// Model identifier for extended-thinking turns.
    pub model_thinking: String,
    /// Maximum agent turns per request.
    pub max_turns: u32,
    /// Working directory handed to the runtime.
    pub cwd: Option<PathBuf>,
    /// Command line used to spawn the agent runtime subprocess.
    pub runtime_command: Vec<String>,
    /// MCP servers made available to the runtime.
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_owned(),
            model_thinking: "claude-sonnet-4-5".to_owned(),
            max_turns: 25,
            cwd: None,
            runtime_command: vec!["claude".to_owned()],
            mcp_servers: HashMap::new(),
        }
    }
}

// ─── SandboxSettings ─────────────────────────────────────────────────────────

/// Filesystem/shell policy settings. Converted into a compiled
/// [`crate::sandbox::SandboxPolicy`] at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSettings {
    /// Whether the sandbox policy is enforced at all.
    pub enabled: bool,
    /// Directory under which agent writes are permitted and artifacts are
    /// served from (`/sandbox/*`).
    pub root: PathBuf,
    /// Additional write roots beyond `root`.
    pub extra_roots: Vec<PathBuf>,
    /// Glob patterns denied for any path argument.
    pub blocked_path_globs: Vec<String>,
    /// If non-empty, only these extensions may be written.
    pub allowed_extensions: Vec<String>,
    /// Extensions that may never be written.
    pub blocked_extensions: Vec<String>,
    /// Case-insensitive regexes rejected in shell commands.
    pub dangerous_command_regexes: Vec<String>,
    /// Regexes rejected in write payloads.
    pub sensitive_content_regexes: Vec<String>,
    /// Rolling 60-second caps.
    pub max_ops_per_min: usize,
    pub max_writes_per_min: usize,
    pub max_shell_per_min: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("./sandbox"),
            extra_roots: Vec::new(),
            blocked_path_globs: vec![
                "**/.git/**".to_owned(),
                "**/node_modules/**".to_owned(),
                "**/*.pem".to_owned(),
                "**/*.key".to_owned(),
                "**/id_rsa*".to_owned(),
            ],
            allowed_extensions: Vec::new(),
            blocked_extensions: vec![
                "exe".to_owned(),
                "dll".to_owned(),
                "so".to_owned(),
                "dylib".to_owned(),
                "sh".to_owned(),
                "bat".to_owned(),
            ],
            dangerous_command_regexes: vec![
                r"rm\s+-[rf]+".to_owned(),
                r"\bsudo\b".to_owned(),
                r"\bchmod\s+777\b".to_owned(),
                r"\bmkfs\b".to_owned(),
                r"\bdd\s+if=".to_owned(),
                r">\s*/dev/sd".to_owned(),
                r"\bshutdown\b|\breboot\b".to_owned(),
                r"curl\s+[^|]*\|\s*(ba)?sh".to_owned(),
                r"wget\s+[^|]*\|\s*(ba)?sh".to_owned(),
            ],
            sensitive_content_regexes: vec![
                r"(?i)api[_-]?key\s*[=:]\s*\S+".to_owned(),
                r"(?i)secret[_-]?key\s*[=:]\s*\S+".to_owned(),
                r"(?i)password\s*[=:]\s*\S+".to_owned(),
                r"-----BEGIN (RSA |EC )?PRIVATE KEY-----".to_owned(),
                r"sk-[A-Za-z0-9]{20,}".to_owned(),
            ],
            max_ops_per_min: 60,
            max_writes_per_min: 20,
            max_shell_per_min: 10,
        }
    }
}

// ─── TraceSettings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceSettings {
    /// Directory where per-turn trace files are written.
    pub dir: PathBuf,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./traces"),
        }
    }
}

// ─── SkillsSettings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SkillsSettings {
    /// Directory scanned for skill documents.
    pub dir: PathBuf,
}

impl Default for SkillsSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./skills"),
        }
    }
}

// ─── SearchSettings ──────────────────────────────────────────────────────────

/// Fallback web-search proxy. The runtime's built-in web search is disallowed
/// in the target deployment, so the agent calls back into the gateway instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub api_url: String,
    pub api_key: String,
}

impl SearchSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty()
    }
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub sandbox: SandboxSettings,
    pub trace: TraceSettings,
    pub skills: SkillsSettings,
    pub search: SearchSettings,
    /// Anthropic credentials, loaded from the environment (see loader).
    #[serde(skip)]
    pub credentials: Credentials,
}

/// API credentials read from the environment / dotenv overlay. Never
/// serialized into config files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
}

impl Credentials {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != "your-api-key-here"
    }
}
