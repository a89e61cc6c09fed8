//! Activity stamping for inbound requests.
//!
//! Every request except health probes counts as user activity, so an
//! attached client keeps its session alive while it is being used.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Paths that never count as activity.
const IGNORED_PATHS: &[&str] = &["/health"];

/// Middleware that stamps the activity timestamp before handling the request.
pub async fn record_activity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !IGNORED_PATHS.contains(&request.uri().path())
        && let Err(e) = state.activity().update_activity()
    {
        tracing::warn!(error = %e, "Failed to stamp request activity");
    }

    next.run(request).await
}
