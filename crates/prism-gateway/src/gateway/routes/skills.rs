//! Skill listing endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::super::state::AppState;
use super::into_http;

/// `GET /api/skills`
pub async fn list_skills(State(state): State<AppState>) -> impl IntoResponse {
    let skills = state.skills.list();
    let count = skills.len();
    Json(json!({ "skills": skills, "count": count }))
}

/// `GET /api/skills/{id}`
pub async fn get_skill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let doc = state.skills.get(&id).map_err(into_http)?;
    Ok(Json(doc).into_response())
}
