//! Fallback web-search proxy.
//!
//! The runtime's built-in web search is disallowed in the target
//! deployment, so the agent (and the UI) call `/api/search`, which
//! forwards to a configured Tavily-style search API.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    config::SearchSettings,
    error::{GatewayError, GatewayResult},
};

const DEFAULT_MAX_RESULTS: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl SearchClient {
    /// `None` when no search backend is configured.
    pub fn from_settings(settings: &SearchSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    pub async fn search(&self, request: &SearchRequest) -> GatewayResult<SearchResponse> {
        let max_results = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let body = json!({
            "api_key": self.api_key,
            "query": request.query,
            "max_results": max_results,
        });
        let response = self
            .http
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Search(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::Search(format!(
                "search backend returned {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Search(format!("invalid response body: {e}")))?;
        Ok(SearchResponse {
            query: request.query.clone(),
            results: normalize_results(&payload),
        })
    }
}

/// Flatten the backend's `results` array into our wire shape, tolerating
/// missing fields.
fn normalize_results(payload: &Value) -> Vec<SearchResult> {
    let Some(items) = payload.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let field = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned()
            };
            SearchResult {
                title: field("title"),
                url: field("url"),
                content: field("content"),
            }
        })
        .collect()
}
