//! Identity provider settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Firebase project credentials and REST endpoints.
///
/// Only `api_key` is needed for the REST calls; the remaining project fields
/// are carried so one settings file can describe the whole project.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Web API key (`VUE_APP_API_KEY`).
    pub api_key: String,
    /// Auth domain (`VUE_APP_AUTH_DOMAIN`).
    pub auth_domain: String,
    /// Realtime database URL (`VUE_APP_DATABASE_URL`).
    pub database_url: String,
    /// Project ID (`VUE_APP_PROJECT_ID`).
    pub project_id: String,
    /// Storage bucket (`VUE_APP_STORAGE_BUCKET`).
    pub storage_bucket: String,
    /// Messaging sender ID (`VUE_APP_MESSAGING_SENDER_ID`).
    pub messaging_sender_id: String,
    /// App ID (`VUE_APP_APP_ID`).
    pub app_id: String,
    /// Measurement ID (`VUE_APP_MEASUREMENT_ID`).
    pub measurement_id: String,
    /// Identity Toolkit REST base URL.
    pub identity_toolkit_url: String,
    /// Secure Token REST base URL.
    pub secure_token_url: String,
    /// Bound on every identity request.
    pub request_timeout_ms: u64,
    /// Seconds before expiry at which the ID token is refreshed.
    pub token_expiry_buffer_seconds: i64,
    /// Where the signed-in session is persisted. `None` keeps it in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_domain: String::new(),
            database_url: String::new(),
            project_id: String::new(),
            storage_bucket: String::new(),
            messaging_sender_id: String::new(),
            app_id: String::new(),
            measurement_id: String::new(),
            identity_toolkit_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            secure_token_url: "https://securetoken.googleapis.com/v1".to_string(),
            request_timeout_ms: 30_000,
            token_expiry_buffer_seconds: 300,
            session_path: None,
        }
    }
}

impl IdentitySettings {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
