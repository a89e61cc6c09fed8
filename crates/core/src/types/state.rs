//! Process-wide authentication state.

use serde::{Deserialize, Serialize};

use super::Profile;

/// Snapshot of who is signed in, published by the session store.
///
/// - `initialized` flips to `true` once and never back.
/// - `loading` is only `true` while the initial resolution, an explicit
///   re-check, or a sign-in is in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub user: Option<Profile>,
    pub loading: bool,
    pub initialized: bool,
}

impl AuthState {
    /// Whether a hydrated profile is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}
