//! Process-wide session state.
//!
//! [`SessionStore`] is a cheap, cloneable handle to a single task that owns
//! [`AuthState`]. Every operation is a command sent to that task; provider
//! notifications (`SIGNED_IN`, `SIGNED_OUT`) are consumed by the same task, so
//! state changes are strictly serialized. Observers read snapshots with
//! [`SessionStore::state`] or follow changes with [`SessionStore::subscribe`].

mod error;
mod worker;

pub use error::AuthError;

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use pantry_core::{AuthState, Email, Profile};

use crate::provider::{IdentityMetadata, IdentityProvider, SignUpOutcome};
use crate::services::profiles::ProfileProvisioner;
use crate::storage::SessionStorage;

use worker::{Command, Worker};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Handle to the session task.
#[derive(Clone)]
pub struct SessionStore {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AuthState>,
}

impl SessionStore {
    /// Spawn the session task on the current tokio runtime.
    ///
    /// `storage` is the medium the provider persists into; sign-out clears
    /// the session, activity and locale keys from it.
    #[must_use]
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        provisioner: ProfileProvisioner,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(AuthState::default());

        let worker = Worker::new(provider, provisioner, storage, state_tx, commands_rx);
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Subscribe to provider notifications and resolve the current session.
    ///
    /// Idempotent: returns `false` without doing anything if already done.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreClosed` if the session task has stopped.
    pub async fn initialize(&self) -> Result<bool, AuthError> {
        self.request(|reply| Command::Initialize { reply }).await
    }

    /// Exchange credentials and hydrate the profile before returning.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidEmail` if `email` is malformed
    /// - `AuthError::Credential` / `AuthError::UnconfirmedIdentity` if the provider refuses
    /// - `AuthError::ProfileProvision` if the profile cannot be resolved
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: SecretString) -> Result<Profile, AuthError> {
        let email = Email::parse(email)?;
        self.request(|reply| Command::SignIn {
            email,
            password,
            reply,
        })
        .await?
    }

    /// Register a new identity. Does not hydrate the user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` for a malformed email, or the
    /// provider's refusal.
    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: SecretString,
        full_name: Option<String>,
    ) -> Result<SignUpOutcome, AuthError> {
        self.sign_up_with_metadata(email, password, IdentityMetadata::with_full_name(full_name))
            .await
    }

    /// Register a new identity with explicit provider metadata.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::sign_up`].
    pub async fn sign_up_with_metadata(
        &self,
        email: &str,
        password: SecretString,
        metadata: IdentityMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let email = Email::parse(email)?;
        self.request(|reply| Command::SignUp {
            email,
            password,
            metadata,
            reply,
        })
        .await?
    }

    /// Finish an OAuth sign-in with the callback's authorization code and
    /// hydrate the profile before returning.
    ///
    /// # Errors
    ///
    /// - `AuthError::Credential` if the provider refuses the code
    /// - `AuthError::ProfileProvision` if the profile cannot be resolved
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<Profile, AuthError> {
        let code = code.to_owned();
        self.request(|reply| Command::ExchangeCode { code, reply })
            .await?
    }

    /// Global sign-out. Local state is cleared even if the provider call fails.
    ///
    /// # Errors
    ///
    /// - `AuthError::Provider` / `AuthError::Credential` if the provider call failed
    /// - `AuthError::Storage` if a local key could not be removed
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::SignOut { reply }).await?
    }

    /// Re-resolve the session, with `loading` set for the duration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Provider` or `AuthError::ProfileProvision` on failure.
    pub async fn check_auth(&self) -> Result<Option<Profile>, AuthError> {
        self.request(|reply| Command::CheckAuth { reply }).await?
    }

    /// Merge `partial` into the signed-in user's settings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotSignedIn` without a user, or
    /// `AuthError::ProfileProvision` if the merge fails.
    pub async fn update_settings(&self, partial: Value) -> Result<Profile, AuthError> {
        self.request(|reply| Command::UpdateSettings { partial, reply })
            .await?
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AuthError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AuthError::StoreClosed)?;
        response.await.map_err(|_| AuthError::StoreClosed)
    }
}
