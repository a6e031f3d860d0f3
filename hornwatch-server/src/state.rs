//! Shared HTTP application state.
//!
//! `AppState` is cloned into every axum handler by the `State` extractor.

use std::sync::Arc;

use hornwatch_core::{
    engine::pipeline::DiagnosticsSnapshot, EngineStatus, HornEngine, RecordingAck,
};
use serde::Serialize;

#[derive(Clone)]
pub struct AppState {
    /// The core engine. Wrapped in `Arc` so handlers and the shutdown hook share it.
    pub engine: Arc<HornEngine>,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: EngineStatus,
    pub queued: usize,
    pub dropped: usize,
    pub diagnostics: DiagnosticsSnapshot,
}

impl AppState {
    pub fn new(engine: Arc<HornEngine>) -> Self {
        Self { engine }
    }

    pub fn start_recording(&self) -> RecordingAck {
        self.engine.start_recording()
    }

    pub fn stop_recording(&self) -> RecordingAck {
        self.engine.stop_recording()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.engine.status(),
            queued: self.engine.queued_chunks(),
            dropped: self.engine.dropped_chunks(),
            diagnostics: self.engine.diagnostics_snapshot(),
        }
    }
}
