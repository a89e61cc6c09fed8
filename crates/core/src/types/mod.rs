//! Core types for Pantry.
//!
//! This module provides type-safe wrappers for identity and profile concepts.

pub mod email;
pub mod id;
pub mod owner;
pub mod profile;
pub mod settings;
pub mod state;

pub use email::{Email, EmailError};
pub use id::IdentityId;
pub use owner::OwnerStatus;
pub use profile::{NewProfile, Profile};
pub use settings::{ProfileSettings, SettingsError};
pub use state::AuthState;
