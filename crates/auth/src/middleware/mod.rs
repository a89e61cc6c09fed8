//! HTTP middleware stack for the auth service.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request tracing with status and latency)
//! 3. Activity stamping (every non-health request counts as activity)

pub mod activity;

pub use activity::record_activity;
