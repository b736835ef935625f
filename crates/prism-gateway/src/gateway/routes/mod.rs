pub mod chat;
pub mod health;
pub mod metrics;
pub mod search;
pub mod skills;
pub mod traces;

use axum::http::StatusCode;

use crate::error::GatewayError;

/// Map crate errors onto HTTP responses.
pub(crate) fn error_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::TraceNotFound(_) | GatewayError::SkillNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::SearchNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::SkillParse(_) | GatewayError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn into_http(error: GatewayError) -> (StatusCode, String) {
    (error_status(&error), error.to_string())
}
