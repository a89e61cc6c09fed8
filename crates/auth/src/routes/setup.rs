//! Platform-owner setup routes.
//!
//! Setup is only reachable until the owner is ready; after that every setup
//! request is redirected to the login page.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use pantry_core::OwnerStatus;

use crate::error::AppError;
use crate::services::BootstrapError;
use crate::state::AppState;

/// Where a finished setup sends the user agent.
pub const LOGIN_PATH: &str = "/auth/login";

#[derive(Debug, Serialize)]
pub struct SetupStatusResponse {
    pub status: OwnerStatus,
}

/// Bootstrap state, or a redirect to login once the owner is ready.
///
/// GET /setup
pub async fn status(State(state): State<AppState>) -> Result<Response, AppError> {
    let status = state.owner().status().await?;
    if status.is_ready() {
        return Ok(Redirect::to(LOGIN_PATH).into_response());
    }
    Ok(Json(SetupStatusResponse { status }).into_response())
}

#[derive(Deserialize)]
pub struct SetupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Create the platform owner.
///
/// POST /setup
pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SetupRequest>,
) -> Result<Response, AppError> {
    let result = state
        .owner()
        .setup(&req.email, SecretString::from(req.password), req.full_name)
        .await;

    match result {
        Ok(outcome) => Ok((StatusCode::CREATED, Json(outcome)).into_response()),
        Err(BootstrapError::AlreadySetUp) => Ok(Redirect::to(LOGIN_PATH).into_response()),
        Err(e) => Err(e.into()),
    }
}
