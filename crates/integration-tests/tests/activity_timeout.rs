//! Idle-timeout enforcement and activity stamping.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use chrono::Duration;
use pantry_auth::clock::Clock;
use pantry_auth::provider::SignOutScope;
use pantry_auth::services::InactivityCheck;
use pantry_auth::storage::{SessionStorage, keys};
use pantry_integration_tests::TestApp;
use secrecy::SecretString;
use serde_json::json;

async fn signed_in_app() -> TestApp {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.state
        .sessions()
        .sign_in("ada@pantry.test", SecretString::from("correct-horse".to_owned()))
        .await
        .unwrap();
    app
}

// ============================================================================
// checkInactivity
// ============================================================================

#[tokio::test]
async fn test_stale_activity_signs_out_once() {
    let app = signed_in_app().await;
    app.storage.set_item(keys::LOCALE, "fr").unwrap();
    app.clock.advance(Duration::hours(25));

    let check = app.state.activity().check_inactivity().await.unwrap();

    assert!(matches!(check, InactivityCheck::Expired { .. }));
    assert_eq!(app.provider.sign_outs(), vec![SignOutScope::Global]);
    for key in [keys::SESSION, keys::LAST_ACTIVITY, keys::LOCALE] {
        assert_eq!(app.storage.get_item(key).unwrap(), None, "{key} left behind");
    }
    app.wait_for(|s| s.user.is_none()).await;

    // The key is gone, so a second check has nothing to decide
    let check = app.state.activity().check_inactivity().await.unwrap();
    assert_eq!(check, InactivityCheck::NoActivityRecorded);
    assert_eq!(app.provider.sign_outs().len(), 1);
}

#[tokio::test]
async fn test_recent_activity_keeps_session() {
    let app = signed_in_app().await;
    app.clock.advance(Duration::hours(23));

    let check = app.state.activity().check_inactivity().await.unwrap();

    assert!(matches!(check, InactivityCheck::Active { .. }));
    assert!(app.provider.sign_outs().is_empty());
    assert!(app.state.sessions().state().user.is_some());
}

#[tokio::test]
async fn test_no_stamp_is_a_no_op() {
    let app = TestApp::new();
    app.start().await;

    let check = app.state.activity().check_inactivity().await.unwrap();

    assert_eq!(check, InactivityCheck::NoActivityRecorded);
    assert!(app.provider.sign_outs().is_empty());
}

#[tokio::test]
async fn test_start_checks_before_stamping() {
    let app = signed_in_app().await;
    app.clock.advance(Duration::days(3));

    let guard = app.state.activity().start().await;

    // The stale stamp was acted on, then replaced by the start-up stamp
    assert_eq!(app.provider.sign_outs(), vec![SignOutScope::Global]);
    assert_eq!(
        app.state.activity().last_activity().unwrap(),
        Some(app.clock.now())
    );
    assert!(guard.is_running());
    guard.release();
}

// ============================================================================
// Stamping
// ============================================================================

#[tokio::test]
async fn test_requests_stamp_activity() {
    let app = signed_in_app().await;
    app.clock.advance(Duration::hours(20));

    let response = app.get("/auth/me").await;
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(
        app.state.activity().last_activity().unwrap(),
        Some(app.clock.now())
    );

    // Twenty more hours is still within the window of the request stamp
    app.clock.advance(Duration::hours(20));
    let check = app.state.activity().check_inactivity().await.unwrap();
    assert!(matches!(check, InactivityCheck::Active { .. }));
}

#[tokio::test]
async fn test_health_checks_do_not_stamp() {
    let app = signed_in_app().await;
    let before = app.state.activity().last_activity().unwrap();
    app.clock.advance(Duration::hours(1));

    let response = app.get("/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(app.state.activity().last_activity().unwrap(), before);
}

#[tokio::test]
async fn test_reported_interaction_stamps_activity() {
    let app = signed_in_app().await;
    app.clock.advance(Duration::hours(2));

    let response = app.post("/api/activity", json!({"kind": "scroll"})).await;

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.state.activity().last_activity().unwrap(),
        Some(app.clock.now())
    );
}

#[tokio::test]
async fn test_unknown_interaction_is_rejected() {
    let app = signed_in_app().await;

    let response = app.post("/api/activity", json!({"kind": "hover"})).await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}
