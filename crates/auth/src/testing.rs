//! In-memory collaborators for tests (`test-util` feature).
//!
//! - [`FakeIdentityProvider`] - accounts, sessions and notifications in memory
//! - [`MemoryProfileStore`] - profile table with the same uniqueness rules as
//!   the `PostgreSQL` schema
//! - [`ManualClock`] - settable time

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use url::Url;

use pantry_core::{Email, IdentityId, NewProfile, Profile, ProfileSettings};

use crate::clock::Clock;
use crate::db::{ProfileStore, RepositoryError};
use crate::provider::{
    EVENT_CHANNEL_CAPACITY, Identity, IdentityEvent, IdentityMetadata, IdentityProvider,
    ProviderError, Session, SignOutScope, SignUpOutcome,
};
use crate::storage::{SessionStorage, keys};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Clock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// =============================================================================
// Identity provider
// =============================================================================

struct Account {
    password: String,
    identity: Identity,
}

/// Identity provider backed by a map of accounts.
///
/// Mirrors the provider behaviour the session store relies on: sign-in emits
/// `SignedIn`, sign-out emits `SignedOut`, unconfirmed accounts are refused
/// with the provider's "Email not confirmed" text. Signing up again for an
/// unconfirmed account returns the existing identity; for a confirmed one it
/// is refused with "User already registered".
pub struct FakeIdentityProvider {
    accounts: Mutex<HashMap<Email, Account>>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<IdentityEvent>,
    storage: Option<Arc<dyn SessionStorage>>,
    auto_confirm: bool,
    subscriptions: AtomicUsize,
    sign_outs: Mutex<Vec<SignOutScope>>,
    oauth_codes: Mutex<HashMap<String, Email>>,
    unreachable: AtomicBool,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            events,
            storage: None,
            auto_confirm: false,
            subscriptions: AtomicUsize::new(0),
            sign_outs: Mutex::new(Vec::new()),
            oauth_codes: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Persist the session blob into `storage`, like a real provider does.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Confirm sign-ups immediately and issue a session.
    #[must_use]
    pub const fn with_auto_confirm(mut self) -> Self {
        self.auto_confirm = true;
        self
    }

    /// Register a confirmed account.
    ///
    /// # Panics
    ///
    /// Panics if `email` is not a valid address.
    #[allow(clippy::unwrap_used)]
    pub fn add_account(&self, email: &str, password: &str, full_name: Option<&str>) -> Identity {
        let email = Email::parse(email).unwrap();
        let identity = Identity {
            id: IdentityId::random(),
            email: email.clone(),
            metadata: IdentityMetadata::with_full_name(full_name.map(ToOwned::to_owned)),
            email_confirmed_at: Some(Utc::now()),
        };
        lock(&self.accounts).insert(
            email,
            Account {
                password: password.to_owned(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Mark an account's email as confirmed.
    pub fn confirm(&self, email: &Email) {
        if let Some(account) = lock(&self.accounts).get_mut(email) {
            account.identity.email_confirmed_at = Some(Utc::now());
        }
    }

    /// The identity registered for `email`.
    #[must_use]
    pub fn identity(&self, email: &Email) -> Option<Identity> {
        lock(&self.accounts)
            .get(email)
            .map(|account| account.identity.clone())
    }

    /// Authorization code the OAuth callback would receive for `email`.
    /// Good for one exchange.
    pub fn issue_oauth_code(&self, email: &Email) -> String {
        let code = format!("code-{}", IdentityId::random());
        lock(&self.oauth_codes).insert(code.clone(), email.clone());
        code
    }

    /// Pretend a session for `identity` was persisted by an earlier process.
    pub fn restore_session(&self, identity: &Identity) {
        *lock(&self.session) = Some(session_for(identity));
    }

    /// Deliver a notification to every subscriber.
    pub fn emit(&self, event: IdentityEvent) {
        let _ = self.events.send(event);
    }

    /// Make every remote call fail with a transport-like rejection.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// How many times `subscribe` was called.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Scopes of every sign-out call, in order.
    #[must_use]
    pub fn sign_outs(&self) -> Vec<SignOutScope> {
        lock(&self.sign_outs).clone()
    }

    fn check_reachable(&self) -> Result<(), ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 503,
                message: "Service Unavailable".to_owned(),
            });
        }
        Ok(())
    }

    fn establish(&self, identity: &Identity) -> Result<Session, ProviderError> {
        let session = session_for(identity);
        if let Some(storage) = &self.storage {
            storage.set_item(keys::SESSION, &format!("{{\"identity\":\"{}\"}}", identity.id))?;
        }
        *lock(&self.session) = Some(session.clone());
        self.emit(IdentityEvent::SignedIn(identity.clone()));
        Ok(session)
    }
}

fn session_for(identity: &Identity) -> Session {
    Session {
        access_token: SecretString::from(format!("access-{}", identity.id)),
        refresh_token: SecretString::from(format!("refresh-{}", identity.id)),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        identity: identity.clone(),
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, ProviderError> {
        self.check_reachable()?;
        let identity = {
            let accounts = lock(&self.accounts);
            match accounts.get(email) {
                Some(account) if account.password == password.expose_secret() => {
                    account.identity.clone()
                }
                _ => {
                    return Err(ProviderError::Rejected {
                        status: 400,
                        message: "Invalid login credentials".to_owned(),
                    });
                }
            }
        };

        if !identity.is_confirmed() {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "Email not confirmed".to_owned(),
            });
        }

        self.establish(&identity)
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: IdentityMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.check_reachable()?;
        let identity = {
            let mut accounts = lock(&self.accounts);
            if let Some(account) = accounts.get_mut(email) {
                if account.identity.is_confirmed() {
                    return Err(ProviderError::Rejected {
                        status: 422,
                        message: "User already registered".to_owned(),
                    });
                }
                // Unconfirmed re-signup replaces the credentials and returns
                // the same identity, still without a session
                account.password = password.expose_secret().to_owned();
                account.identity.metadata = metadata;
                return Ok(SignUpOutcome {
                    identity: account.identity.clone(),
                    session: None,
                });
            }
            let identity = Identity {
                id: IdentityId::random(),
                email: email.clone(),
                metadata,
                email_confirmed_at: self.auto_confirm.then(Utc::now),
            };
            accounts.insert(
                email.clone(),
                Account {
                    password: password.expose_secret().to_owned(),
                    identity: identity.clone(),
                },
            );
            identity
        };

        let session = if self.auto_confirm {
            Some(self.establish(&identity)?)
        } else {
            None
        };
        Ok(SignUpOutcome { identity, session })
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: &Url,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse("https://auth.invalid/authorize")
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, ProviderError> {
        self.check_reachable()?;
        let identity = lock(&self.oauth_codes)
            .remove(auth_code)
            .and_then(|email| self.identity(&email))
            .ok_or_else(|| ProviderError::Rejected {
                status: 400,
                message: "invalid flow state, no valid flow state found".to_owned(),
            })?;
        self.establish(&identity)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError> {
        lock(&self.sign_outs).push(scope);
        *lock(&self.session) = None;
        if let Some(storage) = &self.storage {
            storage.remove_item(keys::SESSION)?;
        }
        self.emit(IdentityEvent::SignedOut);
        self.check_reachable()
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        self.check_reachable()?;
        Ok(lock(&self.session).clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}

// =============================================================================
// Profile store
// =============================================================================

/// Profile table in memory, with primary-key and single-owner constraints.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<BTreeMap<IdentityId, Profile>>,
    confirmed: Mutex<HashSet<Email>>,
    lookups: AtomicUsize,
    created: AtomicUsize,
    conflict_next_insert: AtomicBool,
    fail_inserts: AtomicBool,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile row as-is.
    pub fn seed(&self, profile: Profile) {
        lock(&self.profiles).insert(profile.id, profile);
    }

    /// Record that the provider confirmed `email` (the `auth.users` side of
    /// `check_platform_owner_ready`).
    pub fn confirm_identity(&self, email: &Email) {
        lock(&self.confirmed).insert(email.clone());
    }

    /// Make the next insert lose a race: another writer creates the row
    /// first and the insert reports a uniqueness conflict.
    pub fn conflict_on_next_insert(&self) {
        self.conflict_next_insert.store(true, Ordering::SeqCst);
    }

    /// Make every insert fail with a database error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn profile(&self, id: IdentityId) -> Option<Profile> {
        lock(&self.profiles).get(&id).cloned()
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<Profile> {
        lock(&self.profiles).values().cloned().collect()
    }

    /// Number of `get` calls served.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of rows actually created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn create(&self, new: &NewProfile) -> Profile {
        let now = Utc::now();
        let mut profiles = lock(&self.profiles);
        profiles
            .entry(new.id)
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::SeqCst);
                Profile {
                    id: new.id,
                    email: new.email.clone(),
                    full_name: new.full_name.clone(),
                    avatar_url: new.avatar_url.clone(),
                    is_platform_owner: false,
                    settings: ProfileSettings::new(),
                    created_at: now,
                    updated_at: now,
                }
            })
            .clone()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, id: IdentityId) -> Result<Option<Profile>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.profile(id))
    }

    async fn insert_or_get(&self, profile: &NewProfile) -> Result<Profile, RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        if self.conflict_next_insert.swap(false, Ordering::SeqCst) {
            self.create(profile);
            return Err(RepositoryError::Conflict("profiles_pkey".to_owned()));
        }
        Ok(self.create(profile))
    }

    async fn update_settings(
        &self,
        id: IdentityId,
        settings: &ProfileSettings,
    ) -> Result<Profile, RepositoryError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        profile.settings = settings.clone();
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn find_platform_owner(&self) -> Result<Option<Profile>, RepositoryError> {
        Ok(lock(&self.profiles)
            .values()
            .find(|p| p.is_platform_owner)
            .cloned())
    }

    async fn mark_platform_owner(&self, id: IdentityId) -> Result<Profile, RepositoryError> {
        let mut profiles = lock(&self.profiles);
        if profiles.values().any(|p| p.is_platform_owner && p.id != id) {
            return Err(RepositoryError::Conflict(
                "profiles_single_platform_owner".to_owned(),
            ));
        }
        let profile = profiles.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        profile.is_platform_owner = true;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn is_platform_owner_ready(&self, owner_email: &Email) -> Result<bool, RepositoryError> {
        let owner_exists = lock(&self.profiles)
            .values()
            .any(|p| p.is_platform_owner && &p.email == owner_email);
        Ok(owner_exists && lock(&self.confirmed).contains(owner_email))
    }
}
