//! Metrics endpoints.

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use super::super::state::AppState;

/// `GET /api/metrics`
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// `POST /api/metrics/reset`
pub async fn reset_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.reset();
    Json(json!({ "status": "reset" }))
}
