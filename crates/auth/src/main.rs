//! Pantry auth service.
//!
//! This binary serves the identity/session HTTP surface on port 3002.
//!
//! # Architecture
//!
//! - Axum web framework
//! - GoTrue-compatible identity provider for credentials and tokens
//! - `PostgreSQL` for profiles
//! - Session and activity state persisted to a local JSON file
//!
//! # Start-up order
//!
//! 1. Configuration, Sentry, tracing
//! 2. Database pool, persisted storage, identity provider client
//! 3. Idle check (before the start-up activity stamp), then the periodic check
//! 4. Session store initialization (subscribe + resolve the persisted session)
//! 5. Serve until Ctrl+C / SIGTERM

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use pantry_auth::clock::{Clock, SystemClock};
use pantry_auth::config::AuthConfig;
use pantry_auth::db::{self, ProfileRepository};
use pantry_auth::provider::GoTrueClient;
use pantry_auth::state::{AppState, Collaborators};
use pantry_auth::storage::{ActivityTrackingStorage, FileStorage, SessionStorage};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &AuthConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            send_default_pii: false, // Profiles carry emails and names
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = AuthConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pantry_auth=info,tower_http=debug".into());

    // Use JSON format on Fly.io for structured log parsing, text format locally
    let is_fly = std::env::var("FLY_APP_NAME").is_ok();
    let json_layer = is_fly.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_fly).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p pantry-cli -- migrate

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let file_storage: Arc<dyn SessionStorage> = Arc::new(
        FileStorage::open(&config.storage_dir).expect("Failed to open session storage"),
    );
    // Token writes by the provider also stamp activity
    let storage: Arc<dyn SessionStorage> = Arc::new(ActivityTrackingStorage::new(
        file_storage,
        Arc::clone(&clock),
    ));

    let provider = Arc::new(
        GoTrueClient::new(
            config.provider.url.clone(),
            config.provider.anon_key.clone(),
            Arc::clone(&storage),
            Arc::clone(&clock),
        )
        .expect("Failed to build identity provider client"),
    );

    let state = AppState::new(Collaborators {
        provider,
        profiles: Arc::new(ProfileRepository::new(pool)),
        storage,
        clock,
        owner_email: config.owner_email.clone(),
        oauth_redirect: config
            .oauth_callback_url()
            .expect("Failed to build OAuth callback URL"),
    });

    let activity_guard = state.activity().start().await;
    state
        .sessions()
        .initialize()
        .await
        .expect("Failed to initialize session store");

    let app = pantry_auth::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("auth listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    activity_guard.release();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
