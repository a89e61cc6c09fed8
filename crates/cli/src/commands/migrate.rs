//! Database migration command.
//!
//! ```bash
//! pantry-cli migrate
//! ```
//!
//! Migrations live in `crates/auth/migrations/`. The auth service never runs
//! them on start-up.

use super::{CommandError, connect};

/// Run the profile table and owner-readiness migrations.
///
/// # Errors
///
/// Returns `CommandError` if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../auth/migrations").run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
