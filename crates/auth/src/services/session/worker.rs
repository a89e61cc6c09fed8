//! The task that owns all session state mutation.
//!
//! Commands and provider notifications are consumed one at a time. Queued
//! notifications always go first (`biased`), so the notifications an
//! operation caused are reconciled before the next command starts.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use pantry_core::{AuthState, Email, Profile};

use super::AuthError;
use crate::provider::{
    Identity, IdentityEvent, IdentityMetadata, IdentityProvider, ProviderError, Session,
    SignOutScope, SignUpOutcome,
};
use crate::services::profiles::ProfileProvisioner;
use crate::storage::{SessionStorage, clear_local_state};

pub(super) type Reply<T> = oneshot::Sender<Result<T, AuthError>>;

pub(super) enum Command {
    Initialize {
        reply: oneshot::Sender<bool>,
    },
    SignIn {
        email: Email,
        password: SecretString,
        reply: Reply<Profile>,
    },
    SignUp {
        email: Email,
        password: SecretString,
        metadata: IdentityMetadata,
        reply: Reply<SignUpOutcome>,
    },
    ExchangeCode {
        code: String,
        reply: Reply<Profile>,
    },
    SignOut {
        reply: Reply<()>,
    },
    CheckAuth {
        reply: Reply<Option<Profile>>,
    },
    UpdateSettings {
        partial: Value,
        reply: Reply<Profile>,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::SignIn { .. } => "sign_in",
            Self::SignUp { .. } => "sign_up",
            Self::ExchangeCode { .. } => "exchange_code",
            Self::SignOut { .. } => "sign_out",
            Self::CheckAuth { .. } => "check_auth",
            Self::UpdateSettings { .. } => "update_settings",
        }
    }
}

pub(super) struct Worker {
    provider: Arc<dyn IdentityProvider>,
    provisioner: ProfileProvisioner,
    storage: Arc<dyn SessionStorage>,
    state: watch::Sender<AuthState>,
    commands: mpsc::Receiver<Command>,
    events: Option<broadcast::Receiver<IdentityEvent>>,
}

impl Worker {
    pub(super) fn new(
        provider: Arc<dyn IdentityProvider>,
        provisioner: ProfileProvisioner,
        storage: Arc<dyn SessionStorage>,
        state: watch::Sender<AuthState>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            provider,
            provisioner,
            storage,
            state,
            commands,
            events: None,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = next_event(&mut self.events) => self.on_event(event).await,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
            }
        }
        tracing::debug!("Session store stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle(&mut self, command: Command) {
        tracing::debug!(command = command.name(), "Handling session command");
        match command {
            Command::Initialize { reply } => {
                let _ = reply.send(self.initialize().await);
            }
            Command::SignIn {
                email,
                password,
                reply,
            } => {
                let _ = reply.send(self.sign_in(&email, &password).await);
            }
            Command::SignUp {
                email,
                password,
                metadata,
                reply,
            } => {
                let _ = reply.send(self.sign_up(&email, &password, metadata).await);
            }
            Command::ExchangeCode { code, reply } => {
                let _ = reply.send(self.exchange_code(&code).await);
            }
            Command::SignOut { reply } => {
                let _ = reply.send(self.sign_out().await);
            }
            Command::CheckAuth { reply } => {
                let _ = reply.send(self.check_auth().await);
            }
            Command::UpdateSettings { partial, reply } => {
                let _ = reply.send(self.update_settings(partial).await);
            }
        }
    }

    async fn initialize(&mut self) -> bool {
        if self.state.borrow().initialized {
            tracing::debug!("Session store already initialized");
            return false;
        }

        self.events = Some(self.provider.subscribe());
        self.state.send_modify(|state| {
            state.initialized = true;
            state.loading = true;
        });

        if let Err(e) = self.resolve_session().await {
            tracing::warn!(error = %e, "Initial session resolution failed");
            self.set_loading(false);
        }
        true
    }

    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Profile, AuthError> {
        self.set_loading(true);
        let session = self.provider.sign_in_with_password(email, password).await;
        self.hydrate(session).await
    }

    async fn exchange_code(&self, code: &str) -> Result<Profile, AuthError> {
        self.set_loading(true);
        let session = self.provider.exchange_code_for_session(code).await;
        self.hydrate(session).await
    }

    /// Provision the profile for a freshly issued session and publish it.
    /// `loading` is reset on every path.
    async fn hydrate(&self, session: Result<Session, ProviderError>) -> Result<Profile, AuthError> {
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                self.set_loading(false);
                return Err(e.into());
            }
        };

        match self.provisioner.get_or_create(&session.identity).await {
            Ok(profile) => {
                tracing::info!(identity_id = %profile.id, "Signed in");
                self.set_user(Some(profile.clone()));
                Ok(profile)
            }
            Err(e) => {
                tracing::error!(identity_id = %session.identity.id, error = %e, "Profile provisioning failed");
                self.set_loading(false);
                Err(e.into())
            }
        }
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: IdentityMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let outcome = self.provider.sign_up(email, password, metadata).await?;
        tracing::info!(
            identity_id = %outcome.identity.id,
            confirmed = outcome.session.is_some(),
            "Signed up"
        );
        Ok(outcome)
    }

    /// Local state is cleared even when the provider call fails. A provider
    /// failure is reported ahead of a storage failure.
    async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.provider.sign_out(SignOutScope::Global).await;

        let cleared = clear_local_state(&*self.storage);
        self.set_user(None);

        if let Err(e) = result {
            tracing::warn!(error = %e, "Sign-out failed at the identity provider");
            return Err(e.into());
        }
        cleared?;
        tracing::info!("Signed out");
        Ok(())
    }

    async fn check_auth(&self) -> Result<Option<Profile>, AuthError> {
        self.set_loading(true);
        let result = self.resolve_session().await;
        if result.is_err() {
            self.set_loading(false);
        }
        result
    }

    async fn update_settings(&self, partial: Value) -> Result<Profile, AuthError> {
        let Some(id) = self.state.borrow().user.as_ref().map(|user| user.id) else {
            return Err(AuthError::NotSignedIn);
        };

        let profile = self.provisioner.update_settings(id, partial).await?;
        self.state.send_modify(|state| state.user = Some(profile.clone()));
        Ok(profile)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    async fn on_event(&mut self, event: Result<IdentityEvent, RecvError>) {
        match event {
            Ok(IdentityEvent::SignedIn(identity)) => self.on_signed_in(&identity).await,
            Ok(IdentityEvent::SignedOut) => {
                tracing::debug!(event = "SIGNED_OUT", "Identity notification");
                self.set_user(None);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed identity notifications, re-resolving session");
                if let Err(e) = self.resolve_session().await {
                    tracing::warn!(error = %e, "Session re-resolution failed");
                    self.set_loading(false);
                }
            }
            Err(RecvError::Closed) => {
                tracing::warn!("Identity notifications closed");
                self.events = None;
            }
        }
    }

    async fn on_signed_in(&self, identity: &Identity) {
        tracing::debug!(event = "SIGNED_IN", identity_id = %identity.id, "Identity notification");

        let hydrated = self
            .state
            .borrow()
            .user
            .as_ref()
            .is_some_and(|user| user.id == identity.id);
        if hydrated {
            return;
        }

        match self.provisioner.get_or_create(identity).await {
            Ok(profile) => self.set_user(Some(profile)),
            Err(e) => {
                tracing::error!(identity_id = %identity.id, error = %e, "Profile provisioning failed");
                self.set_loading(false);
            }
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Ask the provider for the current session and hydrate the matching profile.
    async fn resolve_session(&self) -> Result<Option<Profile>, AuthError> {
        let Some(session) = self.provider.get_session().await? else {
            self.set_user(None);
            return Ok(None);
        };

        let profile = self.provisioner.get_or_create(&session.identity).await?;
        self.set_user(Some(profile.clone()));
        Ok(Some(profile))
    }

    fn set_user(&self, user: Option<Profile>) {
        self.state.send_modify(|state| {
            state.user = user;
            state.loading = false;
        });
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<IdentityEvent>>,
) -> Result<IdentityEvent, RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
