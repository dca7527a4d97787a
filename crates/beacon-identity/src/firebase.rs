//! Firebase Auth over its REST API.
//!
//! Endpoints (base URLs come from [`IdentitySettings`]):
//! - `POST {toolkit}/accounts:signUp`
//! - `POST {toolkit}/accounts:signInWithPassword`
//! - `POST {toolkit}/accounts:signInWithIdp`
//! - `POST {toolkit}/accounts:sendOobCode` (`PASSWORD_RESET`)
//! - `POST {securetoken}/token` (form, `grant_type=refresh_token`)
//!
//! All requests carry `?key=<api key>` and are bounded by the configured
//! request timeout.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{OperationError, TokenSource};
use beacon_settings::IdentitySettings;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{AuthAction, AuthProviderError, IdentityError};
use crate::listeners::{AuthCallback, AuthStateListener, ListenerRegistry};
use crate::provider::IdentityProvider;
use crate::storage::SessionStore;
use crate::types::{ActionCodeSettings, FederatedCredential, Session, User, expires_at, now_ms};

/// Token lifetime assumed when the provider omits `expiresIn`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Identity provider backed by the Firebase Auth REST API.
pub struct FirebaseAuth {
    http: reqwest::Client,
    settings: IdentitySettings,
    store: SessionStore,
    session: Mutex<Option<Session>>,
    listeners: Arc<ListenerRegistry>,
    user_tx: watch::Sender<Option<User>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl FirebaseAuth {
    /// Create the adapter, persisting to `settings.session_path` if set.
    pub fn new(settings: IdentitySettings) -> Result<Self, IdentityError> {
        let store = settings
            .session_path
            .as_ref()
            .map_or_else(SessionStore::memory, SessionStore::file);
        Self::with_store(settings, store)
    }

    /// Create the adapter with an explicit session store. A session
    /// persisted in the store is restored.
    pub fn with_store(settings: IdentitySettings, store: SessionStore) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        let session = store.load();
        if let Some(restored) = &session {
            debug!(uid = %restored.user.uid, "restored persisted session");
        }
        let (user_tx, _) = watch::channel(session.as_ref().map(|s| s.user.clone()));
        Ok(Self {
            http,
            settings,
            store,
            session: Mutex::new(session),
            listeners: ListenerRegistry::new(),
            user_tx,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    fn holds_refresh_token(&self, refresh_token: &str) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.refresh_token == refresh_token)
    }

    fn api_key(&self) -> Result<&str, IdentityError> {
        if self.settings.api_key.is_empty() {
            return Err(IdentityError::MissingApiKey);
        }
        Ok(&self.settings.api_key)
    }

    async fn post_toolkit<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<R, IdentityError> {
        let key = self.api_key()?;
        let url = format!(
            "{}/accounts:{endpoint}",
            self.settings.identity_toolkit_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .json(body)
            .send()
            .await?;
        read_response(resp).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, IdentityError> {
        let key = self.api_key()?;
        let url = format!(
            "{}/token",
            self.settings.secure_token_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        read_response(resp).await
    }

    async fn complete_sign_in(
        &self,
        action: AuthAction,
        endpoint: &str,
        body: Value,
        default_provider: &str,
    ) -> Result<User, AuthProviderError> {
        match self.post_toolkit::<SignInResponse>(endpoint, &body).await {
            Ok(resp) => {
                let session = resp.into_session(default_provider);
                let user = session.user.clone();
                // A refresh in flight commits first; ours then replaces it.
                let _guard = self.refresh_lock.lock().await;
                info!(%action, uid = %user.uid, "signed in");
                self.replace_session(Some(session));
                Ok(user)
            }
            Err(e) => Err(fail(action, &e)),
        }
    }

    /// Swap the session, persist it and notify listeners when the signed-in
    /// user changed.
    fn replace_session(&self, next: Option<Session>) {
        let persisted = match &next {
            Some(session) => self.store.save(session),
            None => self.store.clear(),
        };
        if let Err(e) = persisted {
            warn!("failed to persist session: {e}");
        }

        let previous_uid = {
            let mut guard = self.session.lock();
            let previous = guard.as_ref().map(|s| s.user.uid.clone());
            guard.clone_from(&next);
            previous
        };

        let user = next.map(|s| s.user);
        let changed = previous_uid.as_deref() != user.as_ref().map(|u| u.uid.as_str());
        let _ = self.user_tx.send_replace(user.clone());
        if changed {
            debug!(signed_in = user.is_some(), "auth state changed");
            self.listeners.notify(user.as_ref());
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthStateListener {
        let listener = self.listeners.register(Arc::clone(&callback));
        callback(self.current_user().as_ref());
        listener
    }

    fn watch(&self) -> watch::Receiver<Option<User>> {
        self.user_tx.subscribe()
    }

    #[tracing::instrument(skip_all, fields(action = "sign-up"))]
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthProviderError> {
        let body = json!({"email": email, "password": password, "returnSecureToken": true});
        self.complete_sign_in(AuthAction::SignUp, "signUp", body, "password")
            .await
    }

    #[tracing::instrument(skip_all, fields(action = "sign-in"))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthProviderError> {
        let body = json!({"email": email, "password": password, "returnSecureToken": true});
        self.complete_sign_in(AuthAction::Login, "signInWithPassword", body, "password")
            .await
    }

    #[tracing::instrument(skip_all, fields(action = "federated", provider = %credential.provider_id))]
    async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<User, AuthProviderError> {
        let Some(post_body) = credential.post_body() else {
            let err = IdentityError::InvalidArgument(
                "federated credential carries neither an ID token nor an access token".to_string(),
            );
            return Err(fail(AuthAction::Signin, &err));
        };
        let body = json!({
            "postBody": post_body,
            "requestUri": credential.request_uri,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });
        self.complete_sign_in(
            AuthAction::Signin,
            "signInWithIdp",
            body,
            &credential.provider_id,
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(action = "sign-out"))]
    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        let _guard = self.refresh_lock.lock().await;
        let cleared = self.store.clear();
        {
            let mut guard = self.session.lock();
            if guard.take().is_none() {
                debug!("sign-out without a session");
                return cleared.map_err(|e| fail(AuthAction::Signout, &e));
            }
        }
        let _ = self.user_tx.send_replace(None);
        self.listeners.notify(None);
        info!("signed out");
        cleared.map_err(|e| fail(AuthAction::Signout, &e))
    }

    #[tracing::instrument(skip_all, fields(action = "reset-password"))]
    async fn reset_password(
        &self,
        email: &str,
        settings: Option<&ActionCodeSettings>,
    ) -> Result<(), AuthProviderError> {
        let mut body = json!({"requestType": "PASSWORD_RESET", "email": email});
        if let Some(settings) = settings {
            body["continueUrl"] = json!(settings.url);
            body["canHandleCodeInApp"] = json!(settings.handle_code_in_app);
        }
        match self.post_toolkit::<Value>("sendOobCode", &body).await {
            Ok(_) => {
                info!("password reset email sent");
                Ok(())
            }
            Err(e) => Err(fail(AuthAction::ResetPassword, &e)),
        }
    }

    fn current_user(&self) -> Option<User> {
        self.session.lock().as_ref().map(|s| s.user.clone())
    }

    #[tracing::instrument(skip_all)]
    async fn get_id_token(&self) -> Result<Option<String>, IdentityError> {
        let buffer = self.settings.token_expiry_buffer_seconds;
        let Some(session) = self.session() else {
            return Ok(None);
        };
        if !session.should_refresh(buffer, now_ms()) {
            return Ok(Some(session.id_token));
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed (or signed out) while we waited.
        let Some(session) = self.session() else {
            return Ok(None);
        };
        if !session.should_refresh(buffer, now_ms()) {
            return Ok(Some(session.id_token));
        }

        info!(uid = %session.user.uid, "ID token near expiry, refreshing");
        match self.refresh(&session.refresh_token).await {
            Ok(tokens) => {
                if !self.holds_refresh_token(&session.refresh_token) {
                    debug!("session changed during refresh, discarding tokens");
                    return Ok(self.session().map(|s| s.id_token));
                }
                let refreshed = Session {
                    id_token: tokens.id_token,
                    refresh_token: tokens.refresh_token,
                    expires_at: expires_at(parse_expires_in(tokens.expires_in.as_ref())),
                    user: session.user,
                };
                let token = refreshed.id_token.clone();
                self.replace_session(Some(refreshed));
                Ok(Some(token))
            }
            Err(e) => {
                if e.invalidates_session() && self.holds_refresh_token(&session.refresh_token) {
                    warn!("refresh token rejected, signing out: {e}");
                    self.replace_session(None);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TokenSource for FirebaseAuth {
    async fn id_token(&self) -> Result<Option<String>, OperationError> {
        self.get_id_token()
            .await
            .map_err(|e| OperationError::auth(e.to_string()))
    }
}

fn fail(action: AuthAction, err: &IdentityError) -> AuthProviderError {
    let mapped = AuthProviderError::from_identity(action, err);
    warn!(%action, code = %mapped.code, "identity action failed: {err}");
    mapped
}

async fn read_response<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, IdentityError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if !(200..300).contains(&status) {
        return Err(parse_rejection(status, &text));
    }
    Ok(serde_json::from_str(&text)?)
}

/// Decode `{"error": {"message": "CODE : detail"}}`.
fn parse_rejection(status: u16, body: &str) -> IdentityError {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => {
            let (code, detail) = crate::codes::split_server_message(&envelope.error.message);
            IdentityError::Rejected {
                status,
                server_code: code.to_string(),
                detail: detail.map(str::to_string),
            }
        }
        Err(_) => IdentityError::Rejected {
            status,
            server_code: "INTERNAL_ERROR".to_string(),
            detail: None,
        },
    }
}

/// `expiresIn` arrives as a decimal string; accept a number too.
fn parse_expires_in(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        _ => DEFAULT_EXPIRES_IN_SECS,
    }
}

/// Sign-up / sign-in response (Identity Toolkit, camelCase).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    provider_id: Option<String>,
}

impl SignInResponse {
    fn into_session(self, default_provider: &str) -> Session {
        let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());
        Session {
            expires_at: expires_at(parse_expires_in(self.expires_in.as_ref())),
            user: User {
                uid: self.local_id,
                email: non_empty(self.email),
                display_name: non_empty(self.display_name),
                photo_url: non_empty(self.photo_url),
                email_verified: self.email_verified.unwrap_or(false),
                provider_id: self
                    .provider_id
                    .unwrap_or_else(|| default_provider.to_string()),
            },
            id_token: self.id_token,
            refresh_token: self.refresh_token,
        }
    }
}

/// Secure Token response (snake_case).
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::codes;
    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> IdentitySettings {
        IdentitySettings {
            api_key: "test-key".to_string(),
            identity_toolkit_url: format!("{}/v1", server.uri()),
            secure_token_url: format!("{}/securetoken", server.uri()),
            ..IdentitySettings::default()
        }
    }

    fn sign_in_body(uid: &str, expires_in: &str) -> Value {
        json!({
            "kind": "identitytoolkit#VerifyPasswordResponse",
            "localId": uid,
            "email": "ada@example.com",
            "displayName": "",
            "idToken": format!("id-{uid}"),
            "refreshToken": format!("refresh-{uid}"),
            "expiresIn": expires_in,
            "registered": true
        })
    }

    fn error_body(message: &str) -> Value {
        json!({"error": {"code": 400, "message": message, "errors": []}})
    }

    async fn mount_sign_in(server: &MockServer, uid: &str, expires_in: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sign_in_body(uid, expires_in)))
            .mount(server)
            .await;
    }

    fn counting_listener() -> (Arc<AtomicUsize>, Arc<Mutex<Vec<Option<String>>>>, AuthCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (Arc::clone(&count), Arc::clone(&seen));
        let callback: AuthCallback = Arc::new(move |user: Option<&User>| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
            s.lock().push(user.map(|u| u.uid.clone()));
        });
        (count, seen, callback)
    }

    #[tokio::test]
    async fn sign_up_creates_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .and(body_partial_json(json!({"email": "ada@example.com", "returnSecureToken": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(sign_in_body("uid-1", "3600")))
            .expect(1)
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let user = auth.sign_up("ada@example.com", "hunter22").await.unwrap();

        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.provider_id, "password");
        assert!(user.display_name.is_none());
        assert_eq!(auth.current_user(), Some(user));
        assert_eq!(auth.get_id_token().await.unwrap().as_deref(), Some("id-uid-1"));
    }

    #[tokio::test]
    async fn sign_up_existing_email_maps_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body("EMAIL_EXISTS")))
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let err = auth.sign_up("ada@example.com", "hunter22").await.unwrap_err();

        assert_eq!(err.action, AuthAction::SignUp);
        assert_eq!(err.code, codes::EMAIL_ALREADY_IN_USE);
        assert_eq!(err.notice().title, "firebaseAuth.signup");
        assert_eq!(err.notice().text, "firebaseAuth.errors.emailAlreadyInUse");
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn reset_password_unregistered_email_uses_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendOobCode"))
            .and(body_partial_json(json!({"requestType": "PASSWORD_RESET"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body("EMAIL_NOT_FOUND")))
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let err = auth
            .reset_password("nobody@example.com", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, codes::USER_NOT_FOUND);
        assert!(!err.is_mapped());
        let notice = err.notice();
        assert_eq!(notice.title, "firebaseAuth.resetPassword");
        assert_eq!(notice.text, "Firebase: Error (auth/user-not-found).");
        assert_eq!(notice.text, err.provider_message);
    }

    #[tokio::test]
    async fn reset_password_sends_continue_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendOobCode"))
            .and(body_partial_json(json!({
                "email": "ada@example.com",
                "continueUrl": "https://app.example.com/login",
                "canHandleCodeInApp": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "ada@example.com"})))
            .expect(1)
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let action = ActionCodeSettings {
            url: "https://app.example.com/login".to_string(),
            handle_code_in_app: false,
        };
        auth.reset_password("ada@example.com", Some(&action))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_detail_is_kept_in_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
                "WEAK_PASSWORD : Password should be at least 6 characters",
            )))
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let err = auth.sign_up("ada@example.com", "abc").await.unwrap_err();
        assert_eq!(err.code, "auth/weak-password");
        assert_eq!(
            err.user_message,
            "Firebase: Password should be at least 6 characters (auth/weak-password)."
        );
    }

    #[tokio::test]
    async fn federated_sign_in_without_token_is_an_argument_error() {
        let server = MockServer::start().await;
        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let credential = FederatedCredential {
            provider_id: "google.com".to_string(),
            id_token: None,
            access_token: None,
            request_uri: "http://localhost".to_string(),
        };
        let err = auth.sign_in_with_federated(&credential).await.unwrap_err();
        assert_eq!(err.action, AuthAction::Signin);
        assert_eq!(err.notice().text, "firebaseAuth.errors.argumentError");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn federated_sign_in_exchanges_credential() {
        let server = MockServer::start().await;
        let mut body = sign_in_body("uid-g", "3600");
        body["providerId"] = json!("google.com");
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithIdp"))
            .and(body_partial_json(json!({
                "postBody": "id_token=google-jwt&providerId=google.com",
                "requestUri": "http://localhost"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let user = auth
            .sign_in_with_federated(&FederatedCredential::google("google-jwt"))
            .await
            .unwrap();
        assert_eq!(user.provider_id, "google.com");
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_request() {
        let server = MockServer::start().await;
        let auth = FirebaseAuth::new(IdentitySettings {
            api_key: String::new(),
            ..settings(&server)
        })
        .unwrap();
        let err = auth.sign_in("ada@example.com", "pw").await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_API_KEY);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_id_token_without_session_is_none() {
        let server = MockServer::start().await;
        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        assert_eq!(auth.get_id_token().await.unwrap(), None);
        assert_eq!(auth.id_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_id_token_refreshes_near_expiry() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "60").await;
        Mock::given(method("POST"))
            .and(path("/securetoken/token"))
            .and(query_param("key", "test-key"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-uid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "id-fresh",
                "refresh_token": "refresh-fresh",
                "expires_in": "3600",
                "token_type": "Bearer",
                "user_id": "uid-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let (count, _seen, callback) = counting_listener();
        let _listener = auth.on_auth_state_change(callback);
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();

        assert_eq!(auth.get_id_token().await.unwrap().as_deref(), Some("id-fresh"));
        // Second call uses the refreshed token.
        assert_eq!(auth.get_id_token().await.unwrap().as_deref(), Some("id-fresh"));
        // Initial call plus sign-in; the refresh does not notify.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_token_signs_out() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "10").await;
        Mock::given(method("POST"))
            .and(path("/securetoken/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body("TOKEN_EXPIRED")))
            .mount(&server)
            .await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();

        let err = auth.get_id_token().await.unwrap_err();
        assert_matches!(err, IdentityError::Rejected { ref server_code, .. } if server_code == "TOKEN_EXPIRED");
        assert!(auth.current_user().is_none());

        let token_err = auth.id_token().await;
        assert_eq!(token_err.unwrap(), None);
    }

    #[tokio::test]
    async fn sign_up_during_refresh_keeps_the_new_user() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "60").await;
        Mock::given(method("POST"))
            .and(path("/securetoken/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "id_token": "id-fresh-uid-1",
                        "refresh_token": "refresh-fresh-uid-1",
                        "expires_in": "3600"
                    }))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sign_in_body("uid-2", "3600")))
            .mount(&server)
            .await;

        let auth = Arc::new(FirebaseAuth::new(settings(&server)).unwrap());
        let (_count, seen, callback) = counting_listener();
        let _listener = auth.on_auth_state_change(callback);
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();

        let refreshing = Arc::clone(&auth);
        let refresh = tokio::spawn(async move { refreshing.get_id_token().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let user = auth.sign_up("grace@example.com", "hunter22").await.unwrap();
        assert_eq!(user.uid, "uid-2");
        let _ = refresh.await.unwrap().unwrap();

        assert_eq!(auth.current_user().map(|u| u.uid), Some("uid-2".to_string()));
        assert_eq!(auth.get_id_token().await.unwrap().as_deref(), Some("id-uid-2"));
        assert_eq!(
            *seen.lock(),
            vec![None, Some("uid-1".to_string()), Some("uid-2".to_string())]
        );
    }

    #[tokio::test]
    async fn listener_sees_initial_state_and_transitions() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "3600").await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let (count, seen, callback) = counting_listener();
        let listener = auth.on_auth_state_change(callback);

        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();
        // Same user signing in again is not a transition.
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();
        auth.sign_out().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![None, Some("uid-1".to_string()), None]
        );

        listener.unsubscribe();
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn watch_tracks_current_user() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "3600").await;

        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        let rx = auth.watch();
        assert!(rx.borrow().is_none());

        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|u| u.uid.as_str()), Some("uid-1"));
    }

    #[tokio::test]
    async fn session_is_persisted_and_restored() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "uid-1", "3600").await;
        let dir = TempDir::new().unwrap();
        let session_path = dir.path().join("session.json");
        let with_path = IdentitySettings {
            session_path: Some(session_path.to_string_lossy().into_owned()),
            ..settings(&server)
        };

        let auth = FirebaseAuth::new(with_path.clone()).unwrap();
        let _ = auth.sign_in("ada@example.com", "pw").await.unwrap();
        assert!(session_path.exists());

        let restored = FirebaseAuth::new(with_path.clone()).unwrap();
        assert_eq!(restored.current_user().map(|u| u.uid), Some("uid-1".to_string()));

        restored.sign_out().await.unwrap();
        assert!(!session_path.exists());
        assert!(FirebaseAuth::new(with_path).unwrap().current_user().is_none());
    }

    #[tokio::test]
    async fn sign_out_without_session_is_ok() {
        let server = MockServer::start().await;
        let auth = FirebaseAuth::new(settings(&server)).unwrap();
        auth.sign_out().await.unwrap();
    }

    #[test]
    fn parse_rejection_handles_non_json_bodies() {
        let err = parse_rejection(502, "<html>bad gateway</html>");
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
    }

    #[test]
    fn parse_expires_in_accepts_strings_and_numbers() {
        assert_eq!(parse_expires_in(Some(&json!("120"))), 120);
        assert_eq!(parse_expires_in(Some(&json!(90))), 90);
        assert_eq!(parse_expires_in(None), DEFAULT_EXPIRES_IN_SECS);
    }
}
