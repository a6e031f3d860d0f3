//! HTTP command surface.
//!
//! Recording commands always succeed; they only flip the engine's
//! recording flag and return an acknowledgement.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use hornwatch_core::RecordingAck;
use tracing::debug;

use crate::state::{AppState, StatusReport};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(
            "/start_recording",
            get(start_recording_handler).post(start_recording_handler),
        )
        .route(
            "/stop_recording",
            get(stop_recording_handler).post(stop_recording_handler),
        )
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn start_recording_handler(State(state): State<AppState>) -> Json<RecordingAck> {
    debug!("start_recording command");
    Json(state.start_recording())
}

async fn stop_recording_handler(State(state): State<AppState>) -> Json<RecordingAck> {
    debug!("stop_recording command");
    Json(state.stop_recording())
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.status_report())
}
