//! Interaction reporting.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::services::InteractionKind;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InteractionReport {
    pub kind: InteractionKind,
}

/// Record a user interaction (pointer-down, key-down, scroll, touch-start, click).
///
/// POST /api/activity
pub async fn report(
    State(state): State<AppState>,
    Json(report): Json<InteractionReport>,
) -> StatusCode {
    state.activity().record_interaction(report.kind);
    StatusCode::NO_CONTENT
}
