//! Session store lifecycle: initialization, provisioning, settings and sign-out.

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use pantry_auth::provider::{IdentityEvent, SignOutScope};
use pantry_auth::services::AuthError;
use pantry_auth::storage::{SessionStorage, keys};
use pantry_core::{Profile, ProfileSettings};
use pantry_integration_tests::TestApp;
use secrecy::SecretString;
use serde_json::json;

fn password(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_twice_subscribes_once() {
    let app = TestApp::new();

    assert!(app.state.sessions().initialize().await.unwrap());
    assert!(!app.state.sessions().initialize().await.unwrap());

    assert_eq!(app.provider.subscription_count(), 1);
    app.wait_for(|s| s.initialized && !s.loading).await;
}

#[tokio::test]
async fn test_restored_session_is_hydrated_on_start() {
    let app = TestApp::new();
    let identity = app.provider.add_account("sam@pantry.test", "hunter2hunter2", Some("Sam"));
    app.provider.restore_session(&identity);

    app.start().await;

    let state = app.state.sessions().state();
    let user = state.user.unwrap();
    assert_eq!(user.id, identity.id);
    assert_eq!(user.full_name.as_deref(), Some("Sam"));
    assert!(!state.loading);
}

#[tokio::test]
async fn test_start_without_session_publishes_signed_out() {
    let app = TestApp::new();
    app.start().await;

    let state = app.state.sessions().state();
    assert!(state.user.is_none());
    assert!(state.initialized);
    assert!(!state.loading);
}

// ============================================================================
// Sign-in and provisioning
// ============================================================================

#[tokio::test]
async fn test_sign_in_creates_exactly_one_profile() {
    let app = TestApp::new();
    app.start().await;
    let identity = app.provider.add_account("ada@pantry.test", "correct-horse", None);

    let profile = app
        .state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();

    assert_eq!(profile.id, identity.id);
    assert_eq!(profile.email, identity.email);
    assert_eq!(app.profiles.created_count(), 1);

    // A second sign-in reuses the row
    app.state.sessions().sign_out().await.unwrap();
    app.state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();
    assert_eq!(app.profiles.created_count(), 1);
    assert_eq!(app.profiles.profiles().len(), 1);
}

#[tokio::test]
async fn test_sign_in_hydrates_existing_profile() {
    let app = TestApp::new();
    app.start().await;
    let identity = app.provider.add_account("jane@pantry.test", "correct-horse", None);
    let now = Utc::now();
    app.profiles.seed(Profile {
        id: identity.id,
        email: identity.email.clone(),
        full_name: Some("Jane".to_owned()),
        avatar_url: None,
        is_platform_owner: false,
        settings: ProfileSettings::new(),
        created_at: now,
        updated_at: now,
    });

    app.state
        .sessions()
        .sign_in("jane@pantry.test", password("correct-horse"))
        .await
        .unwrap();

    let state = app.state.sessions().state();
    assert_eq!(state.user.unwrap().full_name.as_deref(), Some("Jane"));
    assert!(!state.loading);
    assert_eq!(app.profiles.created_count(), 0);
}

#[tokio::test]
async fn test_concurrent_create_is_refetched() {
    let app = TestApp::new();
    app.start().await;
    let identity = app.provider.add_account("race@pantry.test", "correct-horse", None);
    app.profiles.conflict_on_next_insert();

    let profile = app
        .state
        .sessions()
        .sign_in("race@pantry.test", password("correct-horse"))
        .await
        .unwrap();

    assert_eq!(profile.id, identity.id);
    assert_eq!(app.profiles.created_count(), 1);
}

#[tokio::test]
async fn test_failed_sign_in_resets_loading() {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);

    let err = app
        .state
        .sessions()
        .sign_in("ada@pantry.test", password("wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Credential(ref msg) if msg == "Invalid login credentials"));
    let state = app.state.sessions().state();
    assert!(state.user.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn test_provisioning_failure_resets_loading() {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.profiles.fail_inserts(true);

    let err = app
        .state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ProfileProvision(_)));
    app.wait_for(|s| !s.loading).await;
    assert!(app.state.sessions().state().user.is_none());
}

#[tokio::test]
async fn test_unconfirmed_sign_up_cannot_sign_in() {
    let app = TestApp::new();
    app.start().await;

    let outcome = app
        .state
        .sessions()
        .sign_up("new@pantry.test", password("correct-horse"), Some("New".to_owned()))
        .await
        .unwrap();
    assert!(outcome.session.is_none());
    assert!(app.state.sessions().state().user.is_none());

    let err = app
        .state
        .sessions()
        .sign_in("new@pantry.test", password("correct-horse"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UnconfirmedIdentity));
}

// ============================================================================
// Provider notifications
// ============================================================================

#[tokio::test]
async fn test_external_sign_out_clears_user() {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();

    app.provider.emit(IdentityEvent::SignedOut);

    app.wait_for(|s| s.user.is_none() && !s.loading).await;
}

#[tokio::test]
async fn test_signed_in_event_provisions_profile() {
    let app = TestApp::new();
    app.start().await;
    let identity = app.provider.add_account("oauth@pantry.test", "unused-password", Some("Oli"));

    app.provider.emit(IdentityEvent::SignedIn(identity.clone()));

    app.wait_for(|s| s.user.as_ref().is_some_and(|u| u.id == identity.id))
        .await;
    let profile = app.profiles.profile(identity.id).unwrap();
    assert_eq!(profile.full_name.as_deref(), Some("Oli"));
    assert!(profile.avatar_url.is_none());
}

// ============================================================================
// Settings
// ============================================================================

#[tokio::test]
async fn test_settings_merges_accumulate() {
    let app = TestApp::new();
    app.start().await;
    let identity = app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();

    app.state
        .sessions()
        .update_settings(json!({"language": "fr"}))
        .await
        .unwrap();
    let profile = app
        .state
        .sessions()
        .update_settings(json!({"theme": "dark"}))
        .await
        .unwrap();

    assert_eq!(profile.settings.get("language"), Some(&json!("fr")));
    assert_eq!(profile.settings.get("theme"), Some(&json!("dark")));

    let stored = app.profiles.profile(identity.id).unwrap();
    assert_eq!(stored.settings, profile.settings);
    assert_eq!(app.state.sessions().state().user.unwrap().settings, profile.settings);
}

#[tokio::test]
async fn test_settings_require_sign_in() {
    let app = TestApp::new();
    app.start().await;

    let err = app
        .state
        .sessions()
        .update_settings(json!({"theme": "dark"}))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotSignedIn));
}

// ============================================================================
// Sign-out
// ============================================================================

#[tokio::test]
async fn test_sign_out_clears_user_and_local_state() {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();
    app.storage.set_item(keys::LOCALE, "fr").unwrap();

    // The provider's session write stamped activity
    assert!(app.storage.get_item(keys::LAST_ACTIVITY).unwrap().is_some());

    app.state.sessions().sign_out().await.unwrap();

    assert!(app.state.sessions().state().user.is_none());
    assert_eq!(app.storage.get_item(keys::LAST_ACTIVITY).unwrap(), None);
    assert_eq!(app.storage.get_item(keys::SESSION).unwrap(), None);
    assert_eq!(app.storage.get_item(keys::LOCALE).unwrap(), None);
    assert_eq!(app.provider.sign_outs(), vec![SignOutScope::Global]);
}

#[tokio::test]
async fn test_sign_out_clears_state_when_provider_fails() {
    let app = TestApp::new();
    app.start().await;
    app.provider.add_account("ada@pantry.test", "correct-horse", None);
    app.state
        .sessions()
        .sign_in("ada@pantry.test", password("correct-horse"))
        .await
        .unwrap();
    app.provider.set_unreachable(true);

    let err = app.state.sessions().sign_out().await.unwrap_err();

    assert!(matches!(err, AuthError::Provider(_)));
    assert!(app.state.sessions().state().user.is_none());
    assert_eq!(app.storage.get_item(keys::LAST_ACTIVITY).unwrap(), None);
}
