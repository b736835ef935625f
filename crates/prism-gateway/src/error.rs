//! Error types shared across the gateway.

use thiserror::Error;

/// Errors that can occur anywhere in the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("trace not found: {0}")]
    TraceNotFound(String),

    #[error("trace store error: {0}")]
    TraceStore(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("failed to parse skill file: {0}")]
    SkillParse(String),

    #[error("search backend is not configured")]
    SearchNotConfigured,

    #[error("search request failed: {0}")]
    Search(String),

    #[error("agent runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type used throughout the crate.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::SkillParse(err.to_string())
    }
}
