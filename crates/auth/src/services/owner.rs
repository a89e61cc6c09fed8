//! Platform-owner bootstrap.
//!
//! One configured email may become the platform owner. Until that owner has
//! signed up and confirmed their email, the login entry point for that email
//! shows a setup affordance instead of a password form.
//!
//! ```text
//! NoOwnerYet --setup--> OwnerPendingConfirmation --email confirmed--> OwnerReady
//! ```
//!
//! Both signals come from the profile store: whether any profile carries the
//! owner flag, and `check_platform_owner_ready(owner_email)`.

use std::sync::{Arc, Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use pantry_core::{Email, EmailError, OwnerStatus, Profile};

use crate::db::{ProfileStore, RepositoryError};
use crate::provider::IdentityMetadata;
use crate::services::profiles::{ProfileProvisioner, ProvisionError};
use crate::services::session::{AuthError, SessionStore};

/// Errors that can occur during owner setup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Only the configured owner email may run setup.
    #[error("this email cannot set up the platform owner")]
    NotOwnerEmail,

    /// The owner email can only be registered through setup.
    #[error("this email is reserved for the platform owner")]
    OwnerEmailReserved,

    /// Setup already completed; the caller belongs on the login page.
    #[error("platform owner is already set up")]
    AlreadySetUp,

    /// The store refused a second owner.
    #[error("a platform owner already exists")]
    OwnerExists,

    /// Sign-up failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Profile creation failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// What the login entry point should render for an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum LoginView {
    /// Ordinary email + password form.
    Credentials,
    /// Email + password form for the platform owner.
    OwnerCredentials,
    /// Setup-continuation affordance, no password field.
    SetupContinuation { status: OwnerStatus },
}

/// Result of a setup submission that was not refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SetupOutcome {
    /// The owner was signed up and flagged; awaiting email confirmation
    /// unless the provider confirmed immediately.
    Created { status: OwnerStatus },
    /// An owner already exists and is waiting for confirmation; nothing created.
    PendingConfirmation,
}

/// Drives the owner bootstrap state machine.
pub struct OwnerBootstrap {
    owner_email: Email,
    profiles: Arc<dyn ProfileStore>,
    provisioner: ProfileProvisioner,
    sessions: SessionStore,
    observed: Mutex<OwnerStatus>,
}

impl OwnerBootstrap {
    #[must_use]
    pub fn new(
        owner_email: Email,
        profiles: Arc<dyn ProfileStore>,
        provisioner: ProfileProvisioner,
        sessions: SessionStore,
    ) -> Self {
        Self {
            owner_email,
            profiles,
            provisioner,
            sessions,
            observed: Mutex::new(OwnerStatus::default()),
        }
    }

    /// The configured owner email.
    #[must_use]
    pub const fn owner_email(&self) -> &Email {
        &self.owner_email
    }

    /// Current bootstrap state; never lower than a state already reported.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the profile store cannot be queried.
    pub async fn status(&self) -> Result<OwnerStatus, RepositoryError> {
        let owner_exists = self.profiles.find_platform_owner().await?.is_some();
        let owner_ready = owner_exists
            && self
                .profiles
                .is_platform_owner_ready(&self.owner_email)
                .await?;
        let fresh = OwnerStatus::from_signals(owner_exists, owner_ready);

        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        if fresh < *observed {
            tracing::warn!(?fresh, observed = ?*observed, "Owner status went backwards; keeping last");
        }
        *observed = observed.observe(fresh);
        Ok(*observed)
    }

    /// Refuse ordinary registration of the owner email.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::OwnerEmailReserved` for the owner email, or
    /// `BootstrapError::InvalidEmail`.
    pub fn ensure_registrable(&self, email: &str) -> Result<(), BootstrapError> {
        if Email::parse(email)? == self.owner_email {
            return Err(BootstrapError::OwnerEmailReserved);
        }
        Ok(())
    }

    /// Which login branch to show for `email`.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::InvalidEmail` or a repository error.
    pub async fn login_view(&self, email: &str) -> Result<LoginView, BootstrapError> {
        let email = Email::parse(email)?;
        if email != self.owner_email {
            return Ok(LoginView::Credentials);
        }

        let status = self.status().await?;
        Ok(if status.is_ready() {
            LoginView::OwnerCredentials
        } else {
            LoginView::SetupContinuation { status }
        })
    }

    /// Sign up the platform owner, provision the profile and flag it.
    ///
    /// Safe to retry after a partial failure. An unconfirmed owner identity is
    /// returned again by the provider's sign-up; a confirmed one that the
    /// provider refuses to register twice is resumed by signing in with the
    /// same password.
    ///
    /// # Errors
    ///
    /// - `BootstrapError::NotOwnerEmail` for any other email
    /// - `BootstrapError::AlreadySetUp` once the owner is ready
    /// - `BootstrapError::OwnerExists` if the store refuses the owner flag
    #[instrument(skip(self, password, full_name))]
    pub async fn setup(
        &self,
        email: &str,
        password: SecretString,
        full_name: Option<String>,
    ) -> Result<SetupOutcome, BootstrapError> {
        let email = Email::parse(email)?;
        if email != self.owner_email {
            return Err(BootstrapError::NotOwnerEmail);
        }

        match self.status().await? {
            OwnerStatus::OwnerReady => return Err(BootstrapError::AlreadySetUp),
            OwnerStatus::OwnerPendingConfirmation => return Ok(SetupOutcome::PendingConfirmation),
            OwnerStatus::NoOwnerYet => {}
        }

        let metadata = IdentityMetadata {
            full_name,
            is_platform_owner: Some(true),
            ..IdentityMetadata::default()
        };
        let retry = SecretString::from(password.expose_secret());
        let profile = match self
            .sessions
            .sign_up_with_metadata(email.as_str(), password, metadata)
            .await
        {
            Ok(outcome) => self.provisioner.get_or_create(&outcome.identity).await?,
            Err(AuthError::Credential(reason)) => {
                self.resume_registered(&email, retry, reason).await?
            }
            Err(e) => return Err(e.into()),
        };

        match self.profiles.mark_platform_owner(profile.id).await {
            Ok(_) => {}
            Err(RepositoryError::Conflict(constraint)) => {
                tracing::warn!(%constraint, "Refused second platform owner");
                return Err(BootstrapError::OwnerExists);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(identity_id = %profile.id, "Platform owner created");
        let status = self.status().await?;
        Ok(SetupOutcome::Created { status })
    }

    /// The owner identity already exists at the provider without a flagged
    /// profile. Sign in to recover it; if that fails, report the sign-up refusal.
    async fn resume_registered(
        &self,
        email: &Email,
        password: SecretString,
        reason: String,
    ) -> Result<Profile, BootstrapError> {
        match self.sessions.sign_in(email.as_str(), password).await {
            Ok(profile) => {
                tracing::info!(identity_id = %profile.id, "Resuming setup for registered owner");
                Ok(profile)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Owner sign-in after refused sign-up failed");
                Err(AuthError::Credential(reason).into())
            }
        }
    }

    /// Sign in, then confirm the fresh profile still carries the owner flag.
    ///
    /// A non-owner gets `AuthError::NotPlatformOwner` and the session that was
    /// just established is signed out again.
    ///
    /// # Errors
    ///
    /// Any sign-in error, or `AuthError::NotPlatformOwner`.
    #[instrument(skip(self, password))]
    pub async fn sign_in_owner(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Profile, AuthError> {
        let profile = self.sessions.sign_in(email, password).await?;

        match self.provisioner.get(profile.id).await? {
            Some(fresh) if fresh.is_platform_owner => Ok(fresh),
            _ => {
                tracing::warn!(identity_id = %profile.id, "Owner sign-in by non-owner");
                if let Err(e) = self.sessions.sign_out().await {
                    tracing::warn!(error = %e, "Sign-out after refused owner sign-in failed");
                }
                Err(AuthError::NotPlatformOwner)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use pantry_core::{IdentityId, ProfileSettings};

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testing::{FakeIdentityProvider, MemoryProfileStore};

    const OWNER: &str = "owner@pantry.test";

    struct Harness {
        provider: Arc<FakeIdentityProvider>,
        profiles: Arc<MemoryProfileStore>,
        sessions: SessionStore,
        bootstrap: OwnerBootstrap,
    }

    fn harness(provider: FakeIdentityProvider) -> Harness {
        let provider = Arc::new(provider);
        let profiles = Arc::new(MemoryProfileStore::new());
        let provisioner = ProfileProvisioner::new(profiles.clone());
        let sessions = SessionStore::spawn(
            provider.clone(),
            provisioner.clone(),
            Arc::new(MemoryStorage::new()),
        );
        let bootstrap = OwnerBootstrap::new(
            Email::parse(OWNER).unwrap(),
            profiles.clone(),
            provisioner,
            sessions.clone(),
        );
        Harness {
            provider,
            profiles,
            sessions,
            bootstrap,
        }
    }

    fn owner_email() -> Email {
        Email::parse(OWNER).unwrap()
    }

    #[tokio::test]
    async fn test_setup_moves_to_pending_confirmation() {
        let h = harness(FakeIdentityProvider::new());
        assert_eq!(h.bootstrap.status().await.unwrap(), OwnerStatus::NoOwnerYet);

        let outcome = h
            .bootstrap
            .setup(OWNER, SecretString::from("pw"), Some("Olive".into()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SetupOutcome::Created {
                status: OwnerStatus::OwnerPendingConfirmation
            }
        );
        let identity = h.provider.identity(&owner_email()).unwrap();
        assert_eq!(identity.metadata.is_platform_owner, Some(true));
        let owner = h.profiles.profile(identity.id).unwrap();
        assert!(owner.is_platform_owner);
        assert_eq!(owner.full_name.as_deref(), Some("Olive"));
    }

    #[tokio::test]
    async fn test_login_view_before_and_after_confirmation() {
        let h = harness(FakeIdentityProvider::new());
        h.bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();

        assert_eq!(
            h.bootstrap.login_view(OWNER).await.unwrap(),
            LoginView::SetupContinuation {
                status: OwnerStatus::OwnerPendingConfirmation
            }
        );

        h.provider.confirm(&owner_email());
        h.profiles.confirm_identity(&owner_email());

        assert_eq!(
            h.bootstrap.login_view(OWNER).await.unwrap(),
            LoginView::OwnerCredentials
        );
        assert_eq!(
            h.bootstrap.login_view("cook@pantry.test").await.unwrap(),
            LoginView::Credentials
        );
    }

    #[tokio::test]
    async fn test_setup_while_pending_creates_nothing() {
        let h = harness(FakeIdentityProvider::new());
        h.bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();

        let again = h
            .bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();

        assert_eq!(again, SetupOutcome::PendingConfirmation);
        assert_eq!(h.profiles.profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_when_ready_is_refused() {
        let h = harness(FakeIdentityProvider::new().with_auto_confirm());
        h.bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();
        h.profiles.confirm_identity(&owner_email());

        let result = h.bootstrap.setup(OWNER, SecretString::from("pw"), None).await;

        assert!(matches!(result, Err(BootstrapError::AlreadySetUp)));
        assert_eq!(
            h.profiles.profiles().iter().filter(|p| p.is_platform_owner).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_setup_retries_after_provisioning_failure() {
        let h = harness(FakeIdentityProvider::new());
        h.profiles.fail_inserts(true);

        let first = h.bootstrap.setup(OWNER, SecretString::from("pw"), None).await;
        assert!(matches!(first, Err(BootstrapError::Provision(_))));
        assert_eq!(h.bootstrap.status().await.unwrap(), OwnerStatus::NoOwnerYet);

        h.profiles.fail_inserts(false);
        let second = h
            .bootstrap
            .setup(OWNER, SecretString::from("pw"), Some("Olive".into()))
            .await
            .unwrap();

        assert_eq!(
            second,
            SetupOutcome::Created {
                status: OwnerStatus::OwnerPendingConfirmation
            }
        );
        let identity = h.provider.identity(&owner_email()).unwrap();
        assert!(h.profiles.profile(identity.id).unwrap().is_platform_owner);
        assert_eq!(h.profiles.profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_resumes_confirmed_owner() {
        let h = harness(FakeIdentityProvider::new().with_auto_confirm());
        h.profiles.fail_inserts(true);
        assert!(
            h.bootstrap
                .setup(OWNER, SecretString::from("pw"), None)
                .await
                .is_err()
        );

        h.profiles.fail_inserts(false);
        let outcome = h
            .bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();

        assert!(matches!(outcome, SetupOutcome::Created { .. }));
        let identity = h.provider.identity(&owner_email()).unwrap();
        assert!(h.profiles.profile(identity.id).unwrap().is_platform_owner);
    }

    #[tokio::test]
    async fn test_resume_with_wrong_password_reports_sign_up_refusal() {
        let h = harness(FakeIdentityProvider::new());
        h.provider.add_account(OWNER, "pw", None);

        let result = h
            .bootstrap
            .setup(OWNER, SecretString::from("guess"), None)
            .await;

        let Err(BootstrapError::Auth(AuthError::Credential(message))) = result else {
            panic!("expected the sign-up refusal");
        };
        assert_eq!(message, "User already registered");
        assert!(h.profiles.profiles().is_empty());
        assert_eq!(h.bootstrap.status().await.unwrap(), OwnerStatus::NoOwnerYet);
    }

    #[tokio::test]
    async fn test_owner_email_is_not_registrable() {
        let h = harness(FakeIdentityProvider::new());

        assert!(matches!(
            h.bootstrap.ensure_registrable("Owner@Pantry.test"),
            Err(BootstrapError::OwnerEmailReserved)
        ));
        assert!(h.bootstrap.ensure_registrable("cook@pantry.test").is_ok());
        assert!(matches!(
            h.bootstrap.ensure_registrable("nope"),
            Err(BootstrapError::InvalidEmail(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_rejects_other_emails() {
        let h = harness(FakeIdentityProvider::new());

        let result = h
            .bootstrap
            .setup("cook@pantry.test", SecretString::from("pw"), None)
            .await;

        assert!(matches!(result, Err(BootstrapError::NotOwnerEmail)));
        assert!(h.profiles.profiles().is_empty());
    }

    #[tokio::test]
    async fn test_status_never_moves_back() {
        let h = harness(FakeIdentityProvider::new());
        let now = Utc::now();
        let owner = Profile {
            id: IdentityId::random(),
            email: owner_email(),
            full_name: None,
            avatar_url: None,
            is_platform_owner: true,
            settings: ProfileSettings::new(),
            created_at: now,
            updated_at: now,
        };
        h.profiles.seed(owner.clone());
        h.profiles.confirm_identity(&owner_email());
        assert_eq!(h.bootstrap.status().await.unwrap(), OwnerStatus::OwnerReady);

        h.profiles.seed(Profile {
            is_platform_owner: false,
            ..owner
        });

        assert_eq!(h.bootstrap.status().await.unwrap(), OwnerStatus::OwnerReady);
    }

    #[tokio::test]
    async fn test_owner_sign_in() {
        let h = harness(FakeIdentityProvider::new());
        h.bootstrap
            .setup(OWNER, SecretString::from("pw"), None)
            .await
            .unwrap();
        h.provider.confirm(&owner_email());

        let profile = h
            .bootstrap
            .sign_in_owner(OWNER, SecretString::from("pw"))
            .await
            .unwrap();

        assert!(profile.is_platform_owner);
        assert_eq!(h.sessions.state().user, Some(profile));
    }

    #[tokio::test]
    async fn test_non_owner_sign_in_is_signed_out() {
        let h = harness(FakeIdentityProvider::new());
        h.provider.add_account("cook@pantry.test", "pw", None);

        let err = h
            .bootstrap
            .sign_in_owner("cook@pantry.test", SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::NotPlatformOwner));
        assert!(h.sessions.state().user.is_none());
        assert_eq!(h.provider.sign_outs().len(), 1);
    }
}
