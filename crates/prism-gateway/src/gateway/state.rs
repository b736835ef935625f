//! Shared gateway state handed to every route.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::{
    config::AppConfig,
    metrics::MetricsCollector,
    search::SearchClient,
    skills::SkillStore,
    trace::TraceStore,
    turn::{TurnCoordinator, TurnRequest},
};

// ─── Warmup ──────────────────────────────────────────────────────────────────

/// Pre-start state of the runtime; guarded against concurrent warmups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    NotStarted,
    Warming,
    Ready,
    Failed,
}

pub struct WarmupState {
    status: Mutex<(WarmupStatus, Option<String>)>,
}

impl Default for WarmupState {
    fn default() -> Self {
        Self {
            status: Mutex::new((WarmupStatus::NotStarted, None)),
        }
    }
}

impl WarmupState {
    pub fn status(&self) -> (WarmupStatus, Option<String>) {
        self.status.lock().expect("warmup lock poisoned").clone()
    }

    /// Transition to `Warming` if idle. Returns false when a warmup is
    /// already running or finished.
    pub fn try_begin(&self) -> bool {
        let mut guard = self.status.lock().expect("warmup lock poisoned");
        match guard.0 {
            WarmupStatus::NotStarted | WarmupStatus::Failed => {
                *guard = (WarmupStatus::Warming, None);
                true
            }
            WarmupStatus::Warming | WarmupStatus::Ready => false,
        }
    }

    pub fn finish(&self, result: Result<(), String>) {
        let mut guard = self.status.lock().expect("warmup lock poisoned");
        *guard = match result {
            Ok(()) => (WarmupStatus::Ready, None),
            Err(e) => (WarmupStatus::Failed, Some(e)),
        };
    }
}

// ─── AppState ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coordinator: Arc<TurnCoordinator>,
    pub metrics: Arc<MetricsCollector>,
    pub traces: TraceStore,
    pub skills: SkillStore,
    pub search: Option<Arc<SearchClient>>,
    pub warmup: Arc<WarmupState>,
}

impl AppState {
    /// Run a one-shot minimal turn to pre-start the runtime, updating the
    /// warmup status when it finishes.
    pub async fn run_warmup(&self) {
        let (_handle, mut rx) = self.coordinator.begin(TurnRequest {
            message: "Reply with the single word: ready".to_owned(),
            ..Default::default()
        });
        let mut outcome = Err("stream ended without a terminal frame".to_owned());
        while let Some(frame) = rx.recv().await {
            match &frame {
                crate::translator::SseFrame::MessageComplete { .. } => {
                    outcome = Ok(());
                    break;
                }
                crate::translator::SseFrame::Error { error, details, .. } => {
                    outcome = Err(format!("{error}: {details}"));
                    break;
                }
                _ => {}
            }
        }
        self.warmup.finish(outcome);
    }
}
