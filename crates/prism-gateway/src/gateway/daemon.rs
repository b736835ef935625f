//! HTTP daemon: router assembly, CORS, static artifact serving, bind.

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    config::AppConfig,
    error::{GatewayError, GatewayResult},
    metrics::MetricsCollector,
    runtime::ProcessRuntime,
    sandbox::SandboxPolicy,
    search::SearchClient,
    skills::SkillStore,
    trace::TraceStore,
    turn::TurnCoordinator,
};

use super::{
    routes::{chat, health, metrics, search, skills, traces},
    state::{AppState, WarmupState},
};

/// Build the application state from config, wiring the subprocess runtime.
pub fn build_state(config: AppConfig) -> GatewayResult<AppState> {
    let policy = SandboxPolicy::compile(&config.sandbox).map_err(GatewayError::Config)?;
    let config = Arc::new(config);
    let metrics = Arc::new(MetricsCollector::new());
    let runtime = Arc::new(ProcessRuntime::new(config.agent.runtime_command.clone()));
    let coordinator = TurnCoordinator::new(
        runtime,
        Arc::clone(&metrics),
        Arc::new(policy),
        Arc::clone(&config),
    );
    Ok(AppState {
        traces: TraceStore::new(config.trace.dir.clone()),
        skills: SkillStore::new(config.skills.dir.clone()),
        search: SearchClient::from_settings(&config.search).map(Arc::new),
        warmup: Arc::new(WarmupState::default()),
        coordinator,
        metrics,
        config,
    })
}

/// Assemble the router: API routes, the `/sandbox` static tree, CORS for
/// the UI origin (credentials enabled), and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let sandbox_dir = state.config.sandbox.root.clone();

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/thinking", post(chat::chat_thinking))
        .route("/api/traces", get(traces::list_traces))
        .route("/api/traces/{id}", get(traces::get_trace))
        .route("/api/traces/{id}/download", get(traces::download_trace))
        .route("/api/traces/{id}/timeline", get(traces::trace_timeline))
        .route("/api/metrics", get(metrics::get_metrics))
        .route("/api/metrics/reset", post(metrics::reset_metrics))
        .route("/api/skills", get(skills::list_skills))
        .route("/api/skills/{id}", get(skills::get_skill))
        .route("/api/search", get(search::search_get).post(search::search_post))
        .route("/api/health", get(health::health))
        .route("/api/warmup", post(health::warmup))
        .route("/api/warmup/status", get(health::warmup_status))
        .nest_service("/sandbox", ServeDir::new(sandbox_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = config
        .server
        .ui_origin
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"));
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static("x-session-id"),
            HeaderName::from_static("x-trace-id"),
        ])
        .allow_credentials(true)
}

/// Bind and serve until shutdown. Blocks for the daemon's lifetime.
pub async fn start_gateway(config: AppConfig) -> GatewayResult<()> {
    let addr = config.server.addr.clone();
    let state = build_state(config)?;
    std::fs::create_dir_all(&state.config.sandbox.root)?;
    std::fs::create_dir_all(&state.config.trace.dir)?;

    let app = build_router(state);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config(format!("could not bind {addr}: {e}")))?;
    tracing::info!("prism-gateway listening on {addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Config(format!("server error: {e}")))
}
