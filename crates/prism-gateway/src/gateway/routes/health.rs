//! Health and warmup endpoints.

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use super::super::state::AppState;

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "prism-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /api/warmup`: kick off a one-shot minimal turn to pre-start the
/// runtime. Idempotent while a warmup is running or already done.
pub async fn warmup(State(state): State<AppState>) -> impl IntoResponse {
    if state.warmup.try_begin() {
        let state_clone = state.clone();
        tokio::spawn(async move {
            state_clone.run_warmup().await;
        });
    }
    warmup_status(State(state)).await
}

/// `GET /api/warmup/status`
pub async fn warmup_status(State(state): State<AppState>) -> impl IntoResponse {
    let (status, error) = state.warmup.status();
    Json(json!({ "status": status, "error": error }))
}
