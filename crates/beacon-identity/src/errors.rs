//! Identity error types.
//!
//! [`IdentityError`] is the low-level failure of a single provider call.
//! Public operations convert it into an [`AuthProviderError`], which carries
//! the action that failed, the `auth/<kind>` code and the message to show.

use std::fmt;

use serde::Serialize;

use crate::codes;

/// Errors raised by a provider request or session persistence.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// HTTP request failed before a response body was read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provider answered with an error payload.
    #[error("provider rejected request ({status}): {server_code}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw server code, e.g. `EMAIL_NOT_FOUND`.
        server_code: String,
        /// Detail following the code, if any.
        detail: Option<String>,
    },

    /// A call was made with arguments the provider cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No API key is configured.
    #[error("identity provider API key is not configured")]
    MissingApiKey,
}

impl IdentityError {
    /// The `auth/<kind>` code for this failure.
    pub fn code(&self) -> String {
        match self {
            Self::Http(e) if e.is_timeout() => codes::TIMEOUT.to_string(),
            Self::Http(_) => codes::NETWORK_REQUEST_FAILED.to_string(),
            Self::Json(_) | Self::Io(_) => codes::INTERNAL_ERROR.to_string(),
            Self::Rejected { server_code, .. } => codes::from_server_code(server_code),
            Self::InvalidArgument(_) => codes::ARGUMENT_ERROR.to_string(),
            Self::MissingApiKey => codes::INVALID_API_KEY.to_string(),
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Rejected { detail, .. } => detail.clone(),
            Self::InvalidArgument(message) => Some(message.clone()),
            Self::Http(_) | Self::Json(_) | Self::Io(_) | Self::MissingApiKey => None,
        }
    }

    /// Whether the failure means the stored session can no longer be used.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Rejected { server_code, .. }
                if matches!(
                    server_code.as_str(),
                    "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "USER_NOT_FOUND" | "USER_DISABLED"
                )
        )
    }
}

/// The adapter operation that failed. Determines the notice title.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthAction {
    /// Email/password account creation.
    SignUp,
    /// Email/password sign-in.
    Login,
    /// Federated (identity provider) sign-in.
    Signin,
    /// Sign-out.
    Signout,
    /// Password reset email.
    ResetPassword,
}

impl AuthAction {
    /// Message key for the notice title.
    pub fn title(self) -> &'static str {
        match self {
            Self::SignUp => "firebaseAuth.signup",
            Self::Login => "firebaseAuth.login",
            Self::Signin => "firebaseAuth.signin",
            Self::Signout => "firebaseAuth.signout",
            Self::ResetPassword => "firebaseAuth.resetPassword",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SignUp => "sign-up",
            Self::Login => "sign-in",
            Self::Signin => "federated sign-in",
            Self::Signout => "sign-out",
            Self::ResetPassword => "password reset",
        };
        f.write_str(name)
    }
}

/// What a caller should present for a failed identity action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthNotice {
    /// Title message key.
    pub title: String,
    /// Body text: a mapped message key, or the provider's own message.
    pub text: String,
}

impl fmt::Display for AuthNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.text)
    }
}

/// A failed identity action, code-mapped to a user message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{action} failed: {provider_message}")]
pub struct AuthProviderError {
    /// The action that failed.
    pub action: AuthAction,
    /// `auth/<kind>` code.
    pub code: String,
    /// The provider's raw message, e.g. `Firebase: Error (auth/user-not-found).`
    pub provider_message: String,
    /// Mapped message key, or `provider_message` when the code is unmapped.
    pub user_message: String,
}

impl AuthProviderError {
    /// Build from a code and optional provider detail.
    pub fn new(action: AuthAction, code: impl Into<String>, detail: Option<&str>) -> Self {
        let code = code.into();
        let provider_message = codes::provider_message(&code, detail);
        let user_message = codes::mapped_user_message(&code)
            .map_or_else(|| provider_message.clone(), str::to_string);
        Self {
            action,
            code,
            provider_message,
            user_message,
        }
    }

    /// Wrap a low-level failure of `action`.
    pub fn from_identity(action: AuthAction, err: &IdentityError) -> Self {
        Self::new(action, err.code(), err.detail().as_deref())
    }

    /// Whether `user_message` came from the mapped table.
    pub fn is_mapped(&self) -> bool {
        self.user_message != self.provider_message
    }

    /// Title and text to present for this failure.
    pub fn notice(&self) -> AuthNotice {
        AuthNotice {
            title: self.action.title().to_string(),
            text: self.user_message.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
