//! Pantry CLI - Database migrations and identity inspection tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! pantry-cli migrate
//!
//! # Show where the platform-owner bootstrap stands
//! pantry-cli owner status
//!
//! # Print a profile as JSON
//! pantry-cli profile show 6f1c2a52-0d4e-4f7e-9a57-3b0c1f3f8e21
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `owner status` - Platform-owner bootstrap state
//! - `profile show` - Inspect a profile

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use pantry_core::IdentityId;

mod commands;

#[derive(Parser)]
#[command(name = "pantry-cli")]
#[command(author, version, about = "Pantry CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Inspect the platform owner
    Owner {
        #[command(subcommand)]
        action: OwnerAction,
    },
    /// Inspect profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum OwnerAction {
    /// Show the platform-owner bootstrap state
    Status {
        /// Owner email (defaults to `PANTRY_OWNER_EMAIL`)
        #[arg(short, long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print a profile as JSON
    Show {
        /// Identity ID of the profile
        id: IdentityId,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Owner { action } => match action {
            OwnerAction::Status { email } => commands::owner::status(email.as_deref()).await?,
        },
        Commands::Profile { action } => match action {
            ProfileAction::Show { id } => commands::profile::show(id).await?,
        },
    }
    Ok(())
}
