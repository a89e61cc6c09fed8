//! Profile inspection.
//!
//! ```bash
//! pantry-cli profile show 6f1c2a52-0d4e-4f7e-9a57-3b0c1f3f8e21
//! ```

use pantry_auth::db::{ProfileRepository, ProfileStore};
use pantry_core::IdentityId;

use super::{CommandError, connect};

/// Print the profile for an identity as pretty JSON.
///
/// # Errors
///
/// Returns `CommandError::ProfileNotFound` if no profile has this ID.
pub async fn show(id: IdentityId) -> Result<(), CommandError> {
    let repo = ProfileRepository::new(connect().await?);
    let profile = repo
        .get(id)
        .await?
        .ok_or(CommandError::ProfileNotFound(id))?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    }
    Ok(())
}
