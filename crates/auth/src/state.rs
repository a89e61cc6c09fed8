//! Application state shared across handlers.

use std::sync::Arc;

use url::Url;

use pantry_core::Email;

use crate::clock::Clock;
use crate::db::ProfileStore;
use crate::provider::IdentityProvider;
use crate::services::{ActivityMonitor, OwnerBootstrap, ProfileProvisioner, SessionStore};
use crate::storage::SessionStorage;

/// External collaborators the service is assembled from.
pub struct Collaborators {
    pub provider: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    /// The medium the provider persists its session into.
    pub storage: Arc<dyn SessionStorage>,
    pub clock: Arc<dyn Clock>,
    pub owner_email: Email,
    /// Where OAuth sign-ins return to.
    pub oauth_redirect: Url,
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Holds the one [`SessionStore`] of the process.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionStore,
    owner: OwnerBootstrap,
    activity: ActivityMonitor,
    oauth_redirect: Url,
}

impl AppState {
    /// Wire the services together and spawn the session task.
    ///
    /// Must be called inside a tokio runtime. The session store is not yet
    /// initialized; call [`SessionStore::initialize`] before serving.
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        let Collaborators {
            provider,
            profiles,
            storage,
            clock,
            owner_email,
            oauth_redirect,
        } = collaborators;

        let provisioner = ProfileProvisioner::new(Arc::clone(&profiles));
        let sessions =
            SessionStore::spawn(Arc::clone(&provider), provisioner.clone(), Arc::clone(&storage));
        let owner = OwnerBootstrap::new(owner_email, profiles, provisioner, sessions.clone());
        let activity = ActivityMonitor::new(storage, Arc::clone(&provider), clock);

        Self::from_parts(provider, sessions, owner, activity, oauth_redirect)
    }

    /// Assemble from already-built services.
    #[must_use]
    pub fn from_parts(
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionStore,
        owner: OwnerBootstrap,
        activity: ActivityMonitor,
        oauth_redirect: Url,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                provider,
                sessions,
                owner,
                activity,
                oauth_redirect,
            }),
        }
    }

    /// Get the session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Get the owner bootstrap service.
    #[must_use]
    pub fn owner(&self) -> &OwnerBootstrap {
        &self.inner.owner
    }

    /// Get the activity monitor.
    #[must_use]
    pub fn activity(&self) -> &ActivityMonitor {
        &self.inner.activity
    }

    /// Get the identity provider (for stateless calls like OAuth URLs).
    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.inner.provider.as_ref()
    }

    /// Where OAuth sign-ins return to.
    #[must_use]
    pub fn oauth_redirect(&self) -> &Url {
        &self.inner.oauth_redirect
    }
}
