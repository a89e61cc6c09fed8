//! External identity provider contract.
//!
//! The provider owns credentials, identities and the session token pair.
//! This subsystem only calls it and listens to its change notifications:
//!
//! - `sign_in_with_password` / `sign_up` exchange credentials
//! - `oauth_authorize_url` yields the URL the user agent is redirected to
//! - `exchange_code_for_session` completes that redirect (PKCE)
//! - `sign_out` invalidates the session (globally or locally)
//! - `get_session` reads the persisted session, if still valid
//! - `subscribe` delivers `SignedIn` / `SignedOut` in emission order

mod gotrue;

pub use gotrue::GoTrueClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use pantry_core::{Email, IdentityId};

use crate::storage::StorageError;

/// Capacity of the notification channel each provider keeps.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Provider-side metadata attached to an identity at sign-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Set only by the platform-owner setup flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_platform_owner: Option<bool>,

    /// Anything else the provider stores; passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityMetadata {
    /// Metadata carrying only a display name.
    #[must_use]
    pub fn with_full_name(full_name: Option<String>) -> Self {
        Self {
            full_name,
            ..Self::default()
        }
    }
}

/// The provider's record of a credentialed principal. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: Email,
    #[serde(default)]
    pub metadata: IdentityMetadata,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Whether the provider has confirmed this identity's email.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// A token pair granting continued access, plus the identity it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl Session {
    /// Whether the access token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a sign-up call.
///
/// `session` is only present when the provider confirms emails automatically.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub identity: Identity,
    pub session: Option<Session>,
}

/// Identity-change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityEvent {
    SignedIn(Identity),
    SignedOut,
}

impl IdentityEvent {
    /// Provider event name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
        }
    }
}

/// How widely a sign-out invalidates sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignOutScope {
    /// Every session of the identity, on every device.
    #[default]
    Global,
    /// Only the session held by this process.
    Local,
}

impl SignOutScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

/// Errors returned by an identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered and refused the request. `message` is the
    /// provider's own text, suitable for display.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The request never got a usable answer.
    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a body this client does not understand.
    #[error("unexpected identity provider response: {0}")]
    InvalidResponse(String),

    /// Reading or writing the persisted session failed.
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// An external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange email and password for a session. Emits `SignedIn`.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, ProviderError>;

    /// Register a new identity. Emits `SignedIn` only if a session was issued.
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: IdentityMetadata,
    ) -> Result<SignUpOutcome, ProviderError>;

    /// URL that starts a third-party sign-in (`provider` is e.g. `google`).
    ///
    /// Stores the PKCE code verifier the matching
    /// [`exchange_code_for_session`](Self::exchange_code_for_session) needs.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidResponse` if the URL cannot be built,
    /// or `ProviderError::Storage` if the verifier cannot be stored.
    fn oauth_authorize_url(&self, provider: &str, redirect_to: &Url)
    -> Result<Url, ProviderError>;

    /// Trade the authorization code from the OAuth callback for a session.
    /// Emits `SignedIn`.
    async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, ProviderError>;

    /// Invalidate the session. Emits `SignedOut`, even when the remote call fails.
    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError>;

    /// The persisted session, or `None` if absent or expired.
    async fn get_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Register a listener for identity-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}
