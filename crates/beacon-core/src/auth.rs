//! Token seam between the identity adapter and the client pipeline.

use async_trait::async_trait;

use crate::result::OperationError;

/// Authorization material for a single operation.
///
/// Recomputed for every operation; the authoritative session lives with the
/// [`TokenSource`], never in the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Bearer token, absent when nobody is signed in.
    pub token: Option<String>,
}

impl AuthState {
    /// State carrying a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// State with no token.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Something that can hand out the current short-lived ID token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The current token, refreshed if needed, or `None` without a session.
    async fn id_token(&self) -> Result<Option<String>, OperationError>;
}

/// Fixed token, for tests and service accounts.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenSource for StaticToken {
    async fn id_token(&self) -> Result<Option<String>, OperationError> {
        Ok(self.0.clone())
    }
}
