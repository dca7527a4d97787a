//! # beacon-identity
//!
//! Identity provider adapter for the Beacon client.
//!
//! - [`IdentityProvider`]: sign-up, password and federated sign-in, sign-out,
//!   password reset, current user, ID token and auth-state listeners
//! - [`FirebaseAuth`]: implementation over the Identity Toolkit and Secure
//!   Token REST endpoints, also usable as a [`beacon_core::TokenSource`]
//! - [`SessionStore`]: the signed-in session persisted with `0o600`
//!   permissions so it survives restarts
//!
//! Failures come back as [`AuthProviderError`] values. Presentation is left
//! to the caller: [`AuthProviderError::notice`] yields the title and message
//! to show.

#![deny(unsafe_code)]

pub mod codes;
pub mod errors;
pub mod firebase;
pub mod listeners;
pub mod provider;
pub mod storage;
pub mod types;

pub use errors::{AuthAction, AuthNotice, AuthProviderError, IdentityError};
pub use firebase::FirebaseAuth;
pub use listeners::{AuthCallback, AuthStateListener};
pub use provider::IdentityProvider;
pub use storage::SessionStore;
pub use types::{ActionCodeSettings, FederatedCredential, Session, User};
