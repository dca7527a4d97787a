//! Identity data types.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Snapshot of the signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Provider-assigned user ID (`localId`).
    pub uid: String,
    /// Email address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Profile photo URL, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Whether the email address has been verified.
    #[serde(default)]
    pub email_verified: bool,
    /// Sign-in provider (`password`, `google.com`, ...).
    #[serde(default)]
    pub provider_id: String,
}

/// A signed-in session: the user plus its token pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// The signed-in user.
    pub user: User,
    /// Short-lived bearer token.
    pub id_token: String,
    /// Long-lived token used to mint new ID tokens.
    pub refresh_token: String,
    /// ID token expiry, Unix epoch milliseconds.
    pub expires_at: i64,
}

impl Session {
    /// Whether the ID token expires within `buffer_seconds` of `now`.
    pub fn should_refresh(&self, buffer_seconds: i64, now: i64) -> bool {
        now + buffer_seconds * 1000 >= self.expires_at
    }
}

/// Current time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Expiry timestamp for a token valid for `expires_in_secs` from now.
pub fn expires_at(expires_in_secs: i64) -> i64 {
    now_ms() + expires_in_secs * 1000
}

/// Where the password reset link should send the user afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCodeSettings {
    /// Continue URL embedded in the emailed link.
    pub url: String,
    /// Open the link in the app instead of the hosted page.
    #[serde(default)]
    pub handle_code_in_app: bool,
}

/// Credential from an external identity provider, obtained out of band.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedCredential {
    /// Provider ID, e.g. `google.com`.
    pub provider_id: String,
    /// OIDC ID token issued by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// OAuth access token issued by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// URI the provider redirected to.
    pub request_uri: String,
}

impl FederatedCredential {
    /// Google credential from an ID token.
    pub fn google(id_token: impl Into<String>) -> Self {
        Self {
            provider_id: "google.com".to_string(),
            id_token: Some(id_token.into()),
            access_token: None,
            request_uri: "http://localhost".to_string(),
        }
    }

    /// The `postBody` form the IdP sign-in endpoint expects, or `None` when
    /// the credential carries no token.
    pub fn post_body(&self) -> Option<String> {
        let mut pairs = Vec::new();
        if let Some(token) = &self.id_token {
            pairs.push(("id_token", token.as_str()));
        }
        if let Some(token) = &self.access_token {
            pairs.push(("access_token", token.as_str()));
        }
        if pairs.is_empty() {
            return None;
        }
        pairs.push(("providerId", self.provider_id.as_str()));
        Some(
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoded(v)))
                .collect::<Vec<_>>()
                .join("&"),
        )
    }
}

/// Percent-encode everything outside the unreserved set.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
