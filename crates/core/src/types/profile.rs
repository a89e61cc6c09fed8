//! Domain profile types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Email, IdentityId, ProfileSettings};

/// The domain-owned user record, one per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Same value as the identity ID.
    pub id: IdentityId,
    pub email: Email,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    /// At most one profile holds this flag system-wide.
    pub is_platform_owner: bool,
    pub settings: ProfileSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a profile is created for a newly seen identity.
///
/// Everything else (owner flag, settings, timestamps) takes the store's
/// defaults, which is why callers use the persisted row returned by the
/// store rather than anything built locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub id: IdentityId,
    pub email: Email,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}
