//! Command implementations.
//!
//! # Environment Variables
//!
//! - `PANTRY_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `PANTRY_OWNER_EMAIL` - Platform owner's email, for `owner status`

pub mod migrate;
pub mod owner;
pub mod profile;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

use pantry_auth::db::{self, RepositoryError};
use pantry_core::{EmailError, IdentityId};

/// Errors shared by the CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Profile lookup failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Invalid email.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// No profile with this ID.
    #[error("No profile for identity {0}")]
    ProfileNotFound(IdentityId),

    /// Output could not be rendered.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read an environment variable after loading `.env`.
fn env_var(key: &'static str) -> Result<String, CommandError> {
    dotenvy::dotenv().ok();
    std::env::var(key).map_err(|_| CommandError::MissingEnvVar(key))
}

/// Connect using `PANTRY_DATABASE_URL`, falling back to `DATABASE_URL`.
async fn connect() -> Result<PgPool, CommandError> {
    let url = env_var("PANTRY_DATABASE_URL")
        .or_else(|_| env_var("DATABASE_URL"))
        .map_err(|_| CommandError::MissingEnvVar("PANTRY_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    Ok(db::create_pool(&SecretString::from(url)).await?)
}
