//! Profile store operations.
//!
//! # Database: managed `PostgreSQL` shared with the identity provider
//!
//! ## Tables
//!
//! - `public.profiles` - Domain profiles, keyed by identity ID
//! - `auth.users` - Owned by the identity provider; read only by the
//!   `check_platform_owner_ready` function
//!
//! ## Invariants enforced by the database
//!
//! - One profile per identity (primary key)
//! - At most one platform owner (partial unique index)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/auth/migrations/` and run via:
//! ```bash
//! cargo run -p pantry-cli -- migrate
//! ```

pub mod profiles;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use pantry_core::{Email, IdentityId, NewProfile, Profile, ProfileSettings};

pub use profiles::ProfileRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (duplicate profile, second platform owner).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Keyed access to the profile table.
///
/// Implemented by [`ProfileRepository`] for `PostgreSQL`; the `test-util`
/// feature provides an in-memory implementation with the same constraints.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Select a profile by identity ID.
    async fn get(&self, id: IdentityId) -> Result<Option<Profile>, RepositoryError>;

    /// Insert a profile, or return the existing row when one already has this ID.
    async fn insert_or_get(&self, profile: &NewProfile) -> Result<Profile, RepositoryError>;

    /// Replace the settings object.
    ///
    /// Returns `RepositoryError::NotFound` if no profile has this ID.
    async fn update_settings(
        &self,
        id: IdentityId,
        settings: &ProfileSettings,
    ) -> Result<Profile, RepositoryError>;

    /// The profile flagged as platform owner, if any.
    async fn find_platform_owner(&self) -> Result<Option<Profile>, RepositoryError>;

    /// Flag a profile as the platform owner.
    ///
    /// Returns `RepositoryError::Conflict` if another profile is already owner.
    async fn mark_platform_owner(&self, id: IdentityId) -> Result<Profile, RepositoryError>;

    /// `check_platform_owner_ready(owner_email)`: owner profile exists for this
    /// email and its identity is confirmed.
    async fn is_platform_owner_ready(&self, owner_email: &Email) -> Result<bool, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
