//! Reconciler control handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Reconciler control response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcilerStatusResponse {
    pub paused: bool,
    pub halted: bool,
}

/// Suspend reconcile passes globally
pub async fn pause_reconciler(State(state): State<AppState>) -> Json<ReconcilerStatusResponse> {
    state.supervisor.pause();
    Json(ReconcilerStatusResponse {
        paused: state.supervisor.is_paused(),
        halted: state.supervisor.is_halted(),
    })
}

/// Resume reconcile passes and trigger a catch-up pass everywhere
pub async fn resume_reconciler(State(state): State<AppState>) -> Json<ReconcilerStatusResponse> {
    state.supervisor.resume();
    Json(ReconcilerStatusResponse {
        paused: state.supervisor.is_paused(),
        halted: state.supervisor.is_halted(),
    })
}
