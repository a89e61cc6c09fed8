//! Platform-owner bootstrap states.

use serde::{Deserialize, Serialize};

/// Where the one-time platform-owner setup stands.
///
/// Transitions are linear: `NoOwnerYet -> OwnerPendingConfirmation ->
/// OwnerReady`. Both transitions happen outside this subsystem (the setup
/// sign-up and the provider's email confirmation); the variants are ordered
/// so an observer can refuse to go backwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum OwnerStatus {
    /// No profile carries the platform-owner flag.
    #[default]
    NoOwnerYet,
    /// An owner profile exists but its identity has not confirmed its email.
    OwnerPendingConfirmation,
    /// The owner profile exists and its identity is confirmed. Terminal.
    OwnerReady,
}

impl OwnerStatus {
    /// Derive the state from the two external signals.
    ///
    /// `owner_ready` is only meaningful when an owner exists; a ready signal
    /// without an owner profile is treated as no owner.
    #[must_use]
    pub const fn from_signals(owner_exists: bool, owner_ready: bool) -> Self {
        match (owner_exists, owner_ready) {
            (false, _) => Self::NoOwnerYet,
            (true, false) => Self::OwnerPendingConfirmation,
            (true, true) => Self::OwnerReady,
        }
    }

    /// Fold a fresh observation into the last known state without moving back.
    #[must_use]
    pub fn observe(self, observed: Self) -> Self {
        self.max(observed)
    }

    /// Whether the owner can sign in with a password.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::OwnerReady)
    }
}
