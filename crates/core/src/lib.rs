//! Pantry Core - Shared identity and profile types.
//!
//! This crate provides the types used across the Pantry identity subsystem:
//! - `auth` - Session store, activity monitor, profile provisioning and the
//!   platform-owner bootstrap
//! - `cli` - Command-line tools for migrations and owner inspection
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Emails, identity IDs, profiles, settings and session state

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
