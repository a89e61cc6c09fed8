//! Pantry auth library.
//!
//! Identity and session lifecycle for Pantry:
//! - resolving who is signed in and publishing it as process-wide state
//! - provisioning one profile per identity on first sign-in
//! - signing out sessions that have been idle for too long
//! - the one-time platform-owner bootstrap
//!
//! Credentials and tokens are owned by an external GoTrue-compatible identity
//! provider; profiles live in `PostgreSQL`.
//!
//! The `test-util` feature exposes in-memory collaborators in [`testing`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod provider;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use axum::Router;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use state::AppState;

/// The HTTP application: routes, activity stamping and request tracing.
///
/// Sentry layers are added by the binary.
pub fn app(state: AppState) -> Router {
    routes::routes()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::record_activity,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
