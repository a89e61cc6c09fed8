//! GoTrue-compatible identity provider client.
//!
//! Talks to the managed backend's auth REST API and persists the session
//! blob through a [`SessionStorage`] (normally the activity-tracking wrapper,
//! so token writes double as activity stamps).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use url::Url;

use pantry_core::{Email, IdentityId};

use super::{
    EVENT_CHANNEL_CAPACITY, Identity, IdentityEvent, IdentityMetadata, IdentityProvider,
    ProviderError, Session, SignOutScope, SignUpOutcome,
};
use crate::clock::Clock;
use crate::storage::{SessionStorage, keys};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: uuid::Uuid,
    email: Option<String>,
    #[serde(default)]
    user_metadata: IdentityMetadata,
    email_confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserResponse> for Identity {
    type Error = ProviderError;

    fn try_from(user: UserResponse) -> Result<Self, Self::Error> {
        let email = user
            .email
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidResponse("user has no email".to_owned()))
            .and_then(|raw| {
                Email::parse(raw).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
            })?;

        Ok(Self {
            id: IdentityId::new(user.id),
            email,
            metadata: user.user_metadata,
            email_confirmed_at: user.email_confirmed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserResponse,
}

/// Session blob as persisted in storage.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    /// Epoch seconds.
    expires_at: i64,
    identity: Identity,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_owned(),
            refresh_token: session.refresh_token.expose_secret().to_owned(),
            expires_at: session.expires_at.timestamp(),
            identity: session.identity.clone(),
        }
    }
}

impl StoredSession {
    fn into_session(self) -> Option<Session> {
        let expires_at = Utc.timestamp_opt(self.expires_at, 0).single()?;
        Some(Session {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at,
            identity: self.identity,
        })
    }
}

fn parse_session(value: Value, now: DateTime<Utc>) -> Result<Session, ProviderError> {
    let token: TokenResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("token response: {e}")))?;

    let expires_at = token
        .expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| {
            token
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs))
        })
        .ok_or_else(|| ProviderError::InvalidResponse("token response has no expiry".to_owned()))?;

    Ok(Session {
        access_token: SecretString::from(token.access_token),
        refresh_token: SecretString::from(token.refresh_token),
        expires_at,
        identity: token.user.try_into()?,
    })
}

fn parse_user(value: Value) -> Result<Identity, ProviderError> {
    let user: UserResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("user response: {e}")))?;
    user.try_into()
}

/// Sign-up of an already-confirmed email. GoTrue answers with a placeholder
/// user that has no linked identities instead of an error.
fn is_repeated_sign_up(body: &Value) -> bool {
    body.get("identities")
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty)
}

/// Random PKCE code verifier (256 bits, base64url).
fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge for `verifier`.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Pull a human-readable message out of a GoTrue error body.
///
/// Different GoTrue versions use `error_description`, `msg`, `message` or
/// `error`; fall back to the HTTP reason phrase.
fn error_message(body: &[u8], status: StatusCode) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
        })
        .map_or_else(
            || {
                status
                    .canonical_reason()
                    .unwrap_or("identity provider error")
                    .to_owned()
            },
            ToOwned::to_owned,
        )
}

// =============================================================================
// Client
// =============================================================================

/// REST client for a GoTrue-compatible identity provider.
pub struct GoTrueClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<IdentityEvent>,
}

impl GoTrueClient {
    /// Create a client for the auth API rooted at `base_url`
    /// (e.g. `https://project.example.co/auth/v1/`).
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Transport` if the HTTP client cannot be built.
    pub fn new(
        mut base_url: Url,
        api_key: SecretString,
        storage: Arc<dyn SessionStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ProviderError> {
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pantry-auth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            http,
            base_url,
            api_key,
            storage,
            clock,
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid endpoint {path}: {e}")))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = request
            .header("apikey", self.api_key.expose_secret())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("malformed JSON: {e}")))
    }

    fn stored_session(&self) -> Result<Option<Session>, ProviderError> {
        let Some(raw) = self.storage.get_item(keys::SESSION)? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredSession>(&raw) {
            Ok(stored) => Ok(stored.into_session()),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable stored session");
                self.storage.remove_item(keys::SESSION)?;
                Ok(None)
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<(), ProviderError> {
        let blob = serde_json::to_string(&StoredSession::from(session))
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        self.storage.set_item(keys::SESSION, &blob)?;
        Ok(())
    }

    fn emit(&self, event: IdentityEvent) {
        tracing::debug!(event = event.name(), "identity change");
        // No receivers yet is fine: the session store subscribes on initialize
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, ProviderError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let body = self
            .send(self.http.post(url).json(&json!({
                "email": email.as_str(),
                "password": password.expose_secret(),
            })))
            .await?;

        let session = parse_session(body, self.clock.now())?;
        self.persist(&session)?;
        self.emit(IdentityEvent::SignedIn(session.identity.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: IdentityMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        let url = self.endpoint("signup")?;
        let body = self
            .send(self.http.post(url).json(&json!({
                "email": email.as_str(),
                "password": password.expose_secret(),
                "data": metadata,
            })))
            .await?;

        // With auto-confirm the provider returns a full session; otherwise
        // just the (unconfirmed) user.
        if body.get("access_token").is_some() {
            let session = parse_session(body, self.clock.now())?;
            self.persist(&session)?;
            self.emit(IdentityEvent::SignedIn(session.identity.clone()));
            return Ok(SignUpOutcome {
                identity: session.identity.clone(),
                session: Some(session),
            });
        }

        if is_repeated_sign_up(&body) {
            return Err(ProviderError::Rejected {
                status: 422,
                message: "User already registered".to_owned(),
            });
        }

        Ok(SignUpOutcome {
            identity: parse_user(body)?,
            session: None,
        })
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: &Url,
    ) -> Result<Url, ProviderError> {
        let verifier = generate_code_verifier();
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str())
            .append_pair("code_challenge", &code_challenge(&verifier))
            .append_pair("code_challenge_method", "s256");

        self.storage.set_item(keys::CODE_VERIFIER, &verifier)?;
        Ok(url)
    }

    async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, ProviderError> {
        let Some(verifier) = self.storage.get_item(keys::CODE_VERIFIER)? else {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "No OAuth sign-in in progress".to_owned(),
            });
        };

        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "pkce");

        let result = self
            .send(self.http.post(url).json(&json!({
                "auth_code": auth_code,
                "code_verifier": verifier,
            })))
            .await;
        // A verifier is good for one exchange, successful or not
        self.storage.remove_item(keys::CODE_VERIFIER)?;

        let session = parse_session(result?, self.clock.now())?;
        self.persist(&session)?;
        self.emit(IdentityEvent::SignedIn(session.identity.clone()));
        Ok(session)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError> {
        let remote = match self.stored_session()? {
            Some(session) => {
                let mut url = self.endpoint("logout")?;
                url.query_pairs_mut().append_pair("scope", scope.as_str());
                self.send(
                    self.http
                        .post(url)
                        .bearer_auth(session.access_token.expose_secret()),
                )
                .await
                .map(|_| ())
            }
            None => Ok(()),
        };

        self.storage.remove_item(keys::SESSION)?;
        self.emit(IdentityEvent::SignedOut);

        match remote {
            // The token was already revoked or expired server-side
            Err(ProviderError::Rejected { status, .. })
                if matches!(status, 401 | 403 | 404) =>
            {
                Ok(())
            }
            other => other,
        }
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        let now = self.clock.now();
        Ok(self.stored_session()?.filter(|session| {
            let expired = session.is_expired_at(now);
            if expired {
                tracing::debug!(identity_id = %session.identity.id, "stored session expired");
            }
            !expired
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testing::ManualClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    fn client(storage: Arc<dyn SessionStorage>) -> GoTrueClient {
        // Port 9 (discard) is never contacted by these tests
        GoTrueClient::new(
            Url::parse("http://127.0.0.1:9/auth/v1").unwrap(),
            SecretString::from("anon-key"),
            storage,
            Arc::new(ManualClock::new(now())),
        )
        .unwrap()
    }

    fn user_json() -> Value {
        json!({
            "id": "6f1c8f0e-2d7a-4a4e-9d55-0c1f6a3f2b11",
            "email": "Jane@Example.com",
            "email_confirmed_at": "2026-05-01T10:00:00Z",
            "user_metadata": {"full_name": "Jane", "avatar": "x.png"}
        })
    }

    #[test]
    fn test_error_message_variants() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(
                br#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
                status
            ),
            "Invalid login credentials"
        );
        assert_eq!(
            error_message(br#"{"code":400,"msg":"Email not confirmed"}"#, status),
            "Email not confirmed"
        );
        assert_eq!(error_message(b"<html>", status), "Bad Request");
    }

    #[test]
    fn test_parse_session_uses_expires_in_fallback() {
        let body = json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": user_json(),
        });

        let session = parse_session(body, now()).unwrap();
        assert_eq!(session.expires_at, now() + chrono::Duration::hours(1));
        assert_eq!(session.identity.email.as_str(), "jane@example.com");
        assert_eq!(session.identity.metadata.full_name.as_deref(), Some("Jane"));
        assert_eq!(session.identity.metadata.extra.get("avatar"), Some(&json!("x.png")));
        assert!(session.identity.is_confirmed());
    }

    #[test]
    fn test_parse_user_without_email_is_rejected() {
        let result = parse_user(json!({"id": "6f1c8f0e-2d7a-4a4e-9d55-0c1f6a3f2b11"}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_repeated_sign_up_detection() {
        let mut placeholder = user_json();
        placeholder["identities"] = json!([]);
        assert!(is_repeated_sign_up(&placeholder));

        let mut fresh = user_json();
        fresh["identities"] = json!([{"provider": "email"}]);
        assert!(!is_repeated_sign_up(&fresh));
        assert!(!is_repeated_sign_up(&user_json()));
    }

    #[test]
    fn test_code_challenge_matches_rfc_7636() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(generate_code_verifier().len(), 43);
        assert_ne!(generate_code_verifier(), generate_code_verifier());
    }

    #[test]
    fn test_oauth_authorize_url() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        let client = client(Arc::clone(&storage));
        let redirect = Url::parse("http://localhost:3002/auth/callback").unwrap();

        let url = client.oauth_authorize_url("google", &redirect).unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".to_owned(), "google".to_owned())));
        assert!(pairs.contains(&("redirect_to".to_owned(), redirect.to_string())));
        assert!(pairs.contains(&("code_challenge_method".to_owned(), "s256".to_owned())));

        let verifier = storage.get_item(keys::CODE_VERIFIER).unwrap().unwrap();
        assert!(pairs.contains(&("code_challenge".to_owned(), code_challenge(&verifier))));
    }

    #[tokio::test]
    async fn test_exchange_without_verifier_is_rejected() {
        let client = client(Arc::new(MemoryStorage::new()));

        let result = client.exchange_code_for_session("some-code").await;

        assert!(matches!(
            result,
            Err(ProviderError::Rejected { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_session_respects_expiry() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        let client = client(Arc::clone(&storage));

        let session = parse_session(
            json!({"access_token": "a", "refresh_token": "r", "expires_in": 60, "user": user_json()}),
            now(),
        )
        .unwrap();
        client.persist(&session).unwrap();
        let restored = client.get_session().await.unwrap().unwrap();
        assert_eq!(restored.identity, session.identity);

        let stale = parse_session(
            json!({"access_token": "a", "refresh_token": "r", "expires_in": -60, "user": user_json()}),
            now(),
        )
        .unwrap();
        client.persist(&stale).unwrap();
        assert!(client.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_session_is_discarded() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        storage.set_item(keys::SESSION, "garbage").unwrap();
        let client = client(Arc::clone(&storage));

        assert!(client.get_session().await.unwrap().is_none());
        assert_eq!(storage.get_item(keys::SESSION).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_emits_signed_out() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        let client = client(storage);
        let mut events = client.subscribe();

        client.sign_out(SignOutScope::Global).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), IdentityEvent::SignedOut);
    }
}
