//! Trace browsing endpoints for the UI.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::trace::TraceListQuery;

use super::super::state::AppState;
use super::into_http;

/// `GET /api/traces?status&has_errors&has_sandbox_blocks&search&limit&offset`
pub async fn list_traces(
    State(state): State<AppState>,
    Query(query): Query<TraceListQuery>,
) -> Result<Response, (StatusCode, String)> {
    let traces = state.traces.list(&query).map_err(into_http)?;
    let count = traces.len();
    Ok(Json(json!({ "traces": traces, "count": count })).into_response())
}

/// `GET /api/traces/{id}`
pub async fn get_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let record = state.traces.get(&id).map_err(into_http)?;
    Ok(Json(record).into_response())
}

/// `GET /api/traces/{id}/download`: raw file with attachment headers.
pub async fn download_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    // Re-parse before serving so a corrupt file 500s instead of shipping
    // garbage.
    let record = state.traces.get(&id).map_err(into_http)?;
    let body = serde_json::to_string_pretty(&record)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let disposition = format!("attachment; filename=\"{id}.json\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `GET /api/traces/{id}/timeline`: per-tool spans grouped by iteration.
pub async fn trace_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let view = state.traces.timeline(&id).map_err(into_http)?;
    Ok(Json(view).into_response())
}
