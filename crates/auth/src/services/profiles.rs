//! Profile provisioning.
//!
//! Guarantees one domain profile per authenticated identity. Creation goes
//! through the store's atomic insert-or-return-existing, so concurrent
//! first sign-ins for the same identity converge on the same row.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use pantry_core::{IdentityId, NewProfile, Profile, ProfileSettings, SettingsError};

use crate::db::{ProfileStore, RepositoryError};
use crate::provider::Identity;

/// Errors that can occur while provisioning or updating a profile.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Partial settings were not a JSON object.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// No profile exists for this identity.
    #[error("profile not found: {0}")]
    NotFound(IdentityId),
}

/// Resolves, creates and updates profiles.
#[derive(Clone)]
pub struct ProfileProvisioner {
    store: Arc<dyn ProfileStore>,
}

impl ProfileProvisioner {
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Fresh read of a profile.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Repository` if the store fails.
    pub async fn get(&self, id: IdentityId) -> Result<Option<Profile>, ProvisionError> {
        Ok(self.store.get(id).await?)
    }

    /// Return the identity's profile, creating a minimal one on first sight.
    ///
    /// The returned value is always the persisted row. A uniqueness conflict
    /// on insert means another writer created the row first; it is re-fetched
    /// once instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Repository` if the store fails, or
    /// `ProvisionError::NotFound` if the re-fetch after a conflict finds nothing.
    #[instrument(skip(self, identity), fields(identity_id = %identity.id))]
    pub async fn get_or_create(&self, identity: &Identity) -> Result<Profile, ProvisionError> {
        if let Some(profile) = self.store.get(identity.id).await? {
            return Ok(profile);
        }

        let new = NewProfile {
            id: identity.id,
            email: identity.email.clone(),
            full_name: identity.metadata.full_name.clone(),
            avatar_url: None,
        };

        match self.store.insert_or_get(&new).await {
            Ok(profile) => {
                tracing::info!(email = %profile.email, "Provisioned profile");
                Ok(profile)
            }
            Err(RepositoryError::Conflict(constraint)) => {
                tracing::debug!(%constraint, "Profile created concurrently, re-fetching");
                self.store
                    .get(identity.id)
                    .await?
                    .ok_or(ProvisionError::NotFound(identity.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Shallow-merge `partial` into the stored settings and write them back.
    ///
    /// Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::InvalidSettings` if `partial` is not an object,
    /// `ProvisionError::NotFound` if the profile does not exist.
    #[instrument(skip(self, partial), fields(identity_id = %id))]
    pub async fn update_settings(
        &self,
        id: IdentityId,
        partial: Value,
    ) -> Result<Profile, ProvisionError> {
        let partial = ProfileSettings::try_from(partial)?;
        let mut settings = self
            .store
            .get(id)
            .await?
            .ok_or(ProvisionError::NotFound(id))?
            .settings;
        settings.merge(partial);

        match self.store.update_settings(id, &settings).await {
            Ok(profile) => Ok(profile),
            Err(RepositoryError::NotFound) => Err(ProvisionError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}
