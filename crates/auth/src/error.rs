//! Unified error handling for the auth service.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{AuthError, BootstrapError, ProvisionError};

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Session operation failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Owner setup failed or was refused.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

const fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Credential(_) | AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
        AuthError::UnconfirmedIdentity | AuthError::NotPlatformOwner => StatusCode::FORBIDDEN,
        AuthError::InvalidEmail(_)
        | AuthError::ProfileProvision(ProvisionError::InvalidSettings(_)) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::ProfileProvision(_) | AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Provider(_) => StatusCode::BAD_GATEWAY,
        AuthError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) | Self::Bootstrap(BootstrapError::Auth(err)) => auth_status(err),
            Self::Bootstrap(BootstrapError::InvalidEmail(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Bootstrap(BootstrapError::NotOwnerEmail | BootstrapError::OwnerEmailReserved) => {
                StatusCode::FORBIDDEN
            }
            Self::Bootstrap(BootstrapError::AlreadySetUp | BootstrapError::OwnerExists) => {
                StatusCode::CONFLICT
            }
            Self::Bootstrap(BootstrapError::Provision(_) | BootstrapError::Repository(_))
            | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Auth request error"
            );
        }

        // Don't expose internal error details to clients
        let error = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "Identity provider error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Set the Sentry user context for the signed-in profile.
pub fn set_sentry_user(id: &str, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
