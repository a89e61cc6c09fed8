//! Sign-in, sign-up, sign-out and session routes.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pantry_core::{AuthState, IdentityId, Profile};

use crate::error::{AppError, clear_sentry_user, set_sentry_user};
use crate::services::{AuthError, LoginView};
use crate::state::AppState;

// =============================================================================
// Login view
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginViewQuery {
    pub email: Option<String>,
}

/// Which login branch to render for an email.
///
/// GET /auth/login?email=
pub async fn login_view(
    State(state): State<AppState>,
    Query(query): Query<LoginViewQuery>,
) -> Result<Json<LoginView>, AppError> {
    let email = query
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());

    let view = match email {
        Some(email) => state.owner().login_view(email).await?,
        None => LoginView::Credentials,
    };
    Ok(Json(view))
}

// =============================================================================
// Credentials
// =============================================================================

/// Email + password. No `Debug`, the password must not reach logs.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Sign in and return the hydrated profile.
///
/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .sessions()
        .sign_in(&req.email, SecretString::from(req.password))
        .await?;
    set_sentry_user(&profile.id.to_string(), Some(profile.email.as_str()));
    Ok(Json(profile))
}

/// Owner sign-in: a normal sign-in plus a fresh owner-flag check.
///
/// POST /auth/owner/login
pub async fn owner_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .owner()
        .sign_in_owner(&req.email, SecretString::from(req.password))
        .await?;
    set_sentry_user(&profile.id.to_string(), Some(profile.email.as_str()));
    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub identity_id: IdentityId,
    /// The identity must confirm its email before it can sign in.
    pub confirmation_required: bool,
}

/// Register a new identity. Does not sign in.
///
/// The platform-owner email is refused here; it is registered through setup.
///
/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    state.owner().ensure_registrable(&req.email)?;

    let full_name = req.full_name.filter(|name| !name.trim().is_empty());
    let outcome = state
        .sessions()
        .sign_up(&req.email, SecretString::from(req.password), full_name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            identity_id: outcome.identity.id,
            confirmation_required: outcome.session.is_none(),
        }),
    ))
}

/// Global sign-out.
///
/// POST /auth/logout
pub async fn logout(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    clear_sentry_user();
    state.sessions().sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Session state
// =============================================================================

/// Current `{user, loading, initialized}` snapshot.
///
/// GET /auth/me
pub async fn me(State(state): State<AppState>) -> Json<AuthState> {
    Json(state.sessions().state())
}

/// Re-resolve the session against the provider.
///
/// POST /auth/check
pub async fn check(State(state): State<AppState>) -> Result<Json<AuthState>, AppError> {
    state.sessions().check_auth().await?;
    Ok(Json(state.sessions().state()))
}

/// Shallow-merge a settings object into the signed-in user's profile.
///
/// PATCH /auth/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Json(partial): Json<Value>,
) -> Result<Json<Profile>, AppError> {
    let profile = state.sessions().update_settings(partial).await?;
    Ok(Json(profile))
}

// =============================================================================
// OAuth
// =============================================================================

/// Redirect the user agent to a third-party sign-in.
///
/// GET /auth/oauth/{provider}
pub async fn oauth(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if provider.is_empty() || !provider.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::BadRequest(format!("unknown provider '{provider}'")));
    }

    let url = state
        .provider()
        .oauth_authorize_url(&provider, state.oauth_redirect())
        .map_err(AuthError::from)?;
    tracing::info!(%provider, "Redirecting to OAuth provider");
    Ok(Redirect::to(url.as_str()))
}

/// Query parameters the identity provider appends to the OAuth redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code to exchange for a session.
    pub code: Option<String>,
    /// Error code if the third-party sign-in failed.
    pub error: Option<String>,
    /// Error description.
    pub error_description: Option<String>,
}

/// Finish a third-party sign-in and return the hydrated profile.
///
/// GET /auth/callback?code=
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Profile>, AppError> {
    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        tracing::warn!(%message, "OAuth sign-in failed at the provider");
        return Err(AuthError::Credential(message).into());
    }

    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing authorization code".to_owned()))?;

    let profile = state.sessions().exchange_code(&code).await?;
    set_sentry_user(&profile.id.to_string(), Some(profile.email.as_str()));
    Ok(Json(profile))
}
