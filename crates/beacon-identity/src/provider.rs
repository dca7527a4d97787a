//! The identity provider contract.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::{AuthProviderError, IdentityError};
use crate::listeners::{AuthCallback, AuthStateListener};
use crate::types::{ActionCodeSettings, FederatedCredential, User};

/// Session management against an identity provider.
///
/// Every failing action returns an [`AuthProviderError`]; nothing is shown
/// to the user from here.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register `callback`. It is invoked once immediately with the current
    /// user and again whenever the signed-in user changes.
    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthStateListener;

    /// Receiver that always holds the current user.
    fn watch(&self) -> watch::Receiver<Option<User>>;

    /// Create an email/password account and sign in as it.
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthProviderError>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthProviderError>;

    /// Sign in with a credential from an external identity provider.
    async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<User, AuthProviderError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthProviderError>;

    /// Send a password reset email.
    async fn reset_password(
        &self,
        email: &str,
        settings: Option<&ActionCodeSettings>,
    ) -> Result<(), AuthProviderError>;

    /// The signed-in user, if any.
    fn current_user(&self) -> Option<User>;

    /// A valid ID token, or `None` without a session. Refreshes the token
    /// when it is close to expiry.
    async fn get_id_token(&self) -> Result<Option<String>, IdentityError>;
}
