//! Integration tests for Pantry.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pantry-integration-tests
//! ```
//!
//! Everything runs in-process: the auth service is assembled from the
//! in-memory identity provider, profile store and clock exposed by the
//! `test-util` feature of `pantry-auth`, and the router is driven with
//! `tower::ServiceExt::oneshot`. No database or network is needed.
//!
//! # Test Categories
//!
//! - `session_lifecycle` - Session store, provisioning and settings merges
//! - `activity_timeout` - Idle sign-out
//! - `owner_bootstrap` - Platform-owner state machine
//! - `http_routes` - The HTTP surface end to end

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::{TimeZone, Utc};
use pantry_auth::state::{AppState, Collaborators};
use pantry_auth::storage::{ActivityTrackingStorage, MemoryStorage, SessionStorage};
use pantry_auth::testing::{FakeIdentityProvider, ManualClock, MemoryProfileStore};
use pantry_core::{AuthState, Email};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

/// Email the test service treats as the platform owner.
pub const OWNER_EMAIL: &str = "owner@pantry.test";

/// A fully wired auth service over in-memory collaborators.
pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<FakeIdentityProvider>,
    pub profiles: Arc<MemoryProfileStore>,
    /// Raw storage, below the activity-stamping wrapper.
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
}

/// Status, headers and parsed JSON body of a routed request.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// `Value::Null` when the body is empty or not JSON.
    pub body: Value,
}

impl TestResponse {
    /// The `Location` header, if any.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }
}

impl TestApp {
    /// Sign-ups wait for email confirmation.
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Sign-ups are confirmed immediately.
    #[must_use]
    pub fn with_auto_confirm() -> Self {
        Self::build(true)
    }

    /// # Panics
    ///
    /// Panics if the fixed owner email or redirect URL fails to parse.
    fn build(auto_confirm: bool) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0)
                .single()
                .expect("valid start time"),
        ));
        let tracked: Arc<dyn SessionStorage> = Arc::new(ActivityTrackingStorage::new(
            storage.clone(),
            clock.clone(),
        ));

        let mut provider = FakeIdentityProvider::new().with_storage(Arc::clone(&tracked));
        if auto_confirm {
            provider = provider.with_auto_confirm();
        }
        let provider = Arc::new(provider);
        let profiles = Arc::new(MemoryProfileStore::new());

        let state = AppState::new(Collaborators {
            provider: provider.clone(),
            profiles: profiles.clone(),
            storage: tracked,
            clock: clock.clone(),
            owner_email: Email::parse(OWNER_EMAIL).expect("valid owner email"),
            oauth_redirect: Url::parse("http://localhost:3002/auth/callback")
                .expect("valid redirect"),
        });

        Self {
            state,
            provider,
            profiles,
            storage,
            clock,
        }
    }

    /// Initialize the session store and wait for the first resolution.
    ///
    /// # Panics
    ///
    /// Panics if the store does not settle within two seconds.
    pub async fn start(&self) {
        self.state
            .sessions()
            .initialize()
            .await
            .expect("initialize session store");
        self.wait_for(|state| state.initialized && !state.loading)
            .await;
    }

    /// Wait until the published auth state satisfies `predicate`.
    ///
    /// # Panics
    ///
    /// Panics after two seconds.
    pub async fn wait_for(&self, predicate: impl FnMut(&AuthState) -> bool) {
        let mut rx = self.state.sessions().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("auth state did not settle")
            .expect("session store closed");
    }

    /// The HTTP application over this state.
    #[must_use]
    pub fn router(&self) -> Router {
        pantry_auth::app(self.state.clone())
    }

    /// Route one request through a fresh router.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built or the body cannot be read.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body)).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
