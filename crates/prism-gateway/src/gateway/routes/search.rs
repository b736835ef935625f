//! Fallback web-search proxy endpoints.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    error::GatewayError,
    search::SearchRequest,
};

use super::super::state::AppState;
use super::into_http;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: String,
    #[serde(default)]
    max_results: Option<u32>,
}

/// `GET /api/search?q=...&max_results=...`
pub async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, (StatusCode, String)> {
    run_search(
        state,
        SearchRequest {
            query: params.q,
            max_results: params.max_results,
        },
    )
    .await
}

/// `POST /api/search` with `{query, max_results?}`.
pub async fn search_post(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Response, (StatusCode, String)> {
    run_search(state, request).await
}

async fn run_search(
    state: AppState,
    request: SearchRequest,
) -> Result<Response, (StatusCode, String)> {
    let Some(client) = &state.search else {
        return Err(into_http(GatewayError::SearchNotConfigured));
    };
    let response = client.search(&request).await.map_err(into_http)?;
    Ok(Json(response).into_response())
}
