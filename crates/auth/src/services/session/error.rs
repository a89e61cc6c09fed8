//! Session store error types.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::services::profiles::ProvisionError;
use crate::storage::StorageError;

/// Provider text that marks a sign-in refused for an unconfirmed email.
const UNCONFIRMED_MARKER: &str = "email not confirmed";

/// Errors returned by session store operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider refused the credentials; carries its message verbatim.
    #[error("{0}")]
    Credential(String),

    /// The identity exists but has not confirmed its email.
    #[error("email not confirmed")]
    UnconfirmedIdentity,

    /// The profile could not be loaded or created.
    #[error("profile provisioning failed: {0}")]
    ProfileProvision(#[from] ProvisionError),

    /// Signed in, but the profile is not the platform owner.
    #[error("not authorized as platform owner")]
    NotPlatformOwner,

    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] pantry_core::EmailError),

    /// The operation needs a signed-in user.
    #[error("not signed in")]
    NotSignedIn,

    /// Transport failure or unexpected provider response.
    #[error("identity provider error: {0}")]
    Provider(#[source] ProviderError),

    /// Local session state could not be cleared.
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),

    /// The session task has stopped.
    #[error("session store is not running")]
    StoreClosed,
}

impl AuthError {
    /// Whether the caller caused the error (bad input, refused credentials).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Credential(_)
                | Self::UnconfirmedIdentity
                | Self::NotPlatformOwner
                | Self::InvalidEmail(_)
                | Self::NotSignedIn
                | Self::ProfileProvision(ProvisionError::InvalidSettings(_))
        )
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { message, .. }
                if message.to_lowercase().contains(UNCONFIRMED_MARKER) =>
            {
                Self::UnconfirmedIdentity
            }
            ProviderError::Rejected { status, message } if (400..500).contains(&status) => {
                Self::Credential(message)
            }
            other => Self::Provider(other),
        }
    }
}
