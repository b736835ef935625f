//! `POST /api/chat` and `POST /api/chat/thinking`: one turn, streamed back
//! as Server-Sent Events.

use std::{convert::Infallible, time::Duration};

use axum::{
    Json,
    extract::State,
    http::HeaderValue,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};

use crate::{translator::SseFrame, turn::TurnRequest};

use super::super::state::AppState;

pub async fn chat(State(state): State<AppState>, Json(request): Json<TurnRequest>) -> Response {
    start_turn(state, request, false)
}

/// Extended-thinking variant: same pipeline, thinking model id.
pub async fn chat_thinking(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Response {
    start_turn(state, request, true)
}

fn start_turn(state: AppState, mut request: TurnRequest, thinking: bool) -> Response {
    request.thinking = thinking;
    let (handle, rx) = state.coordinator.begin(request);

    let stream = UnboundedReceiverStream::new(rx)
        .map(|frame: SseFrame| {
            Ok::<Event, Infallible>(
                Event::default()
                    .event(frame.event_name())
                    .data(frame.payload().to_string()),
            )
        });

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&handle.session_id) {
        headers.insert("X-Session-Id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&handle.trace_id) {
        headers.insert("X-Trace-Id", value);
    }
    response
}
