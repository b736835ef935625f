//! Configuration loading: TOML file, dotenv overlay, env-var overrides.
//!
//! # Loading order
//! 1. Parse the config file (`PRISM_CONFIG` or `./prism.toml`) if present
//! 2. Overlay `.env` (existing process variables win over the file)
//! 3. Read `ANTHROPIC_*` credentials and model overrides from the environment
//!
//! The resolved credentials and model ids are handed to the runtime
//! subprocess through [`child_env`] rather than by mutating the process
//! environment.

use std::{env, path::Path};

use crate::error::{GatewayError, GatewayResult};

use super::schema::{AppConfig, Credentials};

/// Environment defaults for the runtime subprocess. Forces UTF-8 I/O in the
/// child and a non-interactive editor.
const CHILD_ENV_DEFAULTS: &[(&str, &str)] = &[
    ("PYTHONIOENCODING", "utf-8"),
    ("LANG", "C.UTF-8"),
    ("EDITOR", "true"),
];

/// Load [`AppConfig`] from `path`, falling back to defaults if the file does
/// not exist, then applying the dotenv overlay and environment overrides.
pub fn load_config(path: &Path) -> GatewayResult<AppConfig> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| GatewayError::Config(format!("failed to parse {path:?}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(GatewayError::Config(format!(
                "failed to read {path:?}: {e}"
            )));
        }
    };

    // Overlay .env next to the config file, then the CWD one. `dotenvy`
    // never overwrites variables already present in the process.
    if let Some(parent) = path.parent() {
        let _ = dotenvy::from_path(parent.join(".env"));
    }
    let _ = dotenvy::dotenv();

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from `PRISM_CONFIG` or `./prism.toml`.
pub fn load_default_config() -> GatewayResult<AppConfig> {
    let path = env::var("PRISM_CONFIG").unwrap_or_else(|_| "prism.toml".to_owned());
    load_config(Path::new(&path))
}

fn apply_env_overrides(config: &mut AppConfig) {
    let mut creds = Credentials::default();
    if let Ok(v) = env::var("ANTHROPIC_API_KEY") {
        creds.api_key = v;
    }
    if let Ok(v) = env::var("ANTHROPIC_BASE_URL") {
        creds.base_url = v;
    }
    if let Ok(v) = env::var("ANTHROPIC_MODEL") {
        config.agent.model = v;
    }
    if let Ok(v) = env::var("ANTHROPIC_MODEL_THINKING") {
        config.agent.model_thinking = v;
    }
    if let Ok(v) = env::var("TAVILY_API_KEY") {
        config.search.api_key = v;
    }
    config.credentials = creds;
}

/// Environment handed to the runtime subprocess: credentials, model ids,
/// and the I/O encoding defaults.
pub fn child_env(config: &AppConfig) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    if !config.credentials.api_key.is_empty() {
        vars.push((
            "ANTHROPIC_API_KEY".to_owned(),
            config.credentials.api_key.clone(),
        ));
    }
    if !config.credentials.base_url.is_empty() {
        vars.push((
            "ANTHROPIC_BASE_URL".to_owned(),
            config.credentials.base_url.clone(),
        ));
    }
    vars.push(("ANTHROPIC_MODEL".to_owned(), config.agent.model.clone()));
    vars.push((
        "ANTHROPIC_MODEL_THINKING".to_owned(),
        config.agent.model_thinking.clone(),
    ));
    for (key, value) in CHILD_ENV_DEFAULTS {
        vars.push(((*key).to_owned(), (*value).to_owned()));
    }
    vars
}
