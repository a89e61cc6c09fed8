//! Profile repository for `PostgreSQL`.
//!
//! Queries are checked at runtime (`sqlx::query_as`), so the crate builds
//! without a live database or an offline query cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use pantry_core::{Email, IdentityId, NewProfile, Profile, ProfileSettings};

use super::{ProfileStore, RepositoryError};

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for `PostgreSQL` profile queries.
#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    full_name: Option<String>,
    avatar_url: Option<String>,
    is_platform_owner: bool,
    settings: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = RepositoryError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        let settings = ProfileSettings::try_from(row.settings).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid settings in database: {e}"))
        })?;

        Ok(Self {
            id: IdentityId::new(row.id),
            email,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
            is_platform_owner: row.is_platform_owner,
            settings,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map unique violations to `Conflict`, everything else to `Database`.
fn classify(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(
            db.constraint()
                .map_or_else(|| db.message().to_owned(), ToOwned::to_owned),
        ),
        _ => RepositoryError::Database(err),
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for profile database operations.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    /// Create a new profile repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for ProfileRepository {
    async fn get(&self, id: IdentityId) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            SELECT id, email, full_name, avatar_url, is_platform_owner, settings,
                   created_at, updated_at
            FROM public.profiles
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn insert_or_get(&self, profile: &NewProfile) -> Result<Profile, RepositoryError> {
        // The no-op update makes RETURNING yield the existing row on conflict,
        // so two racing sign-ins both get the same persisted profile.
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            INSERT INTO public.profiles (id, email, full_name, avatar_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
            RETURNING id, email, full_name, avatar_url, is_platform_owner, settings,
                      created_at, updated_at
            ",
        )
        .bind(profile.id.as_uuid())
        .bind(profile.email.as_str())
        .bind(profile.full_name.as_deref())
        .bind(profile.avatar_url.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        row.try_into()
    }

    async fn update_settings(
        &self,
        id: IdentityId,
        settings: &ProfileSettings,
    ) -> Result<Profile, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            UPDATE public.profiles
            SET settings = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, full_name, avatar_url, is_platform_owner, settings,
                      created_at, updated_at
            ",
        )
        .bind(id.as_uuid())
        .bind(settings.to_value())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    async fn find_platform_owner(&self) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            SELECT id, email, full_name, avatar_url, is_platform_owner, settings,
                   created_at, updated_at
            FROM public.profiles
            WHERE is_platform_owner
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn mark_platform_owner(&self, id: IdentityId) -> Result<Profile, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            UPDATE public.profiles
            SET is_platform_owner = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, full_name, avatar_url, is_platform_owner, settings,
                      created_at, updated_at
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    async fn is_platform_owner_ready(&self, owner_email: &Email) -> Result<bool, RepositoryError> {
        let ready: Option<bool> =
            sqlx::query_scalar("SELECT public.check_platform_owner_ready($1)")
                .bind(owner_email.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(ready.unwrap_or(false))
    }
}
