//! Platform-owner inspection.
//!
//! ```bash
//! pantry-cli owner status
//! pantry-cli owner status -e owner@pantry.test
//! ```

use pantry_auth::db::{ProfileRepository, ProfileStore};
use pantry_core::{Email, OwnerStatus};

use super::{CommandError, connect, env_var};

/// Log where the platform-owner bootstrap stands.
///
/// # Errors
///
/// Returns `CommandError` if the email is missing or invalid, or the
/// database cannot be read.
pub async fn status(email: Option<&str>) -> Result<(), CommandError> {
    let email = match email {
        Some(email) => email.to_owned(),
        None => env_var("PANTRY_OWNER_EMAIL")?,
    };
    let email = Email::parse(&email)?;

    let repo = ProfileRepository::new(connect().await?);
    let owner = repo.find_platform_owner().await?;
    let ready = repo.is_platform_owner_ready(&email).await?;
    let status = OwnerStatus::from_signals(owner.is_some(), ready);

    match &owner {
        Some(profile) if profile.email != email => tracing::warn!(
            owner = %profile.email,
            expected = %email,
            "Platform owner profile belongs to a different email"
        ),
        Some(profile) => tracing::info!(id = %profile.id, "Platform owner profile found"),
        None => tracing::info!("No platform owner profile"),
    }
    tracing::info!(?status, "Platform owner status for {}", email);

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string(&status)?);
    }
    Ok(())
}
