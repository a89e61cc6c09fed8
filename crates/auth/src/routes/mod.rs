//! HTTP route handlers for the auth service.
//!
//! # Route Structure
//!
//! ```text
//! GET   /health                 - Health check
//!
//! # Auth
//! GET   /auth/login?email=      - Which login branch to show
//! POST  /auth/login             - Sign in with email + password
//! POST  /auth/owner/login       - Platform-owner sign in
//! POST  /auth/register          - Sign up
//! POST  /auth/logout            - Global sign out
//! GET   /auth/me                - Current session state
//! POST  /auth/check             - Re-resolve the session
//! PATCH /auth/settings          - Merge profile settings
//! GET   /auth/oauth/{provider}  - Redirect to a third-party sign-in
//! GET   /auth/callback?code=    - Complete a third-party sign-in
//!
//! # Platform-owner setup
//! GET   /setup                  - Bootstrap state (redirects to login once ready)
//! POST  /setup                  - Create the platform owner
//!
//! # Activity
//! POST  /api/activity           - Report a user interaction
//! ```

pub mod activity;
pub mod auth;
pub mod setup;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::state::AppState;

/// Build the full router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_routes())
        .route("/setup", get(setup::status).post(setup::submit))
        .route("/api/activity", post(activity::report))
}

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(auth::login_view).post(auth::login))
        .route("/owner/login", post(auth::owner_login))
        .route("/register", post(auth::register))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/check", post(auth::check))
        .route("/settings", patch(auth::update_settings))
        .route("/oauth/{provider}", get(auth::oauth))
        .route("/callback", get(auth::callback))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}
