//! Business logic services for identity and sessions.
//!
//! # Services
//!
//! - `activity` - Idle-session timeout
//! - `owner` - Platform-owner bootstrap state machine
//! - `profiles` - One profile per identity, settings merges
//! - `session` - Process-wide session state

pub mod activity;
pub mod owner;
pub mod profiles;
pub mod session;

pub use activity::{ActivityGuard, ActivityMonitor, InactivityCheck, InteractionKind};
pub use owner::{BootstrapError, LoginView, OwnerBootstrap, SetupOutcome};
pub use profiles::{ProfileProvisioner, ProvisionError};
pub use session::{AuthError, SessionStore};
