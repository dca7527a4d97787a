//! Attaching the signed-in user's token to outgoing operations.
//!
//! Before every operation the current token is fetched from the
//! [`AuthConfig`]. With a token, the operation's fetch options are
//! materialized and carry exactly one `Authorization: Bearer <token>`
//! header; without one, the operation passes through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{
    AuthState, FetchOptions, Operation, OperationError, OperationResult, TokenSource,
};
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{debug, warn};

use crate::exchange::{Exchange, Forward, ResultStream};

/// Policy for fetching and attaching auth state.
#[async_trait]
pub trait AuthConfig: Send + Sync {
    /// Whether to fetch auth state for this operation. Defaults to always.
    fn should_attempt_auth(&self, _operation: &Operation) -> bool {
        true
    }

    /// Fetch the current auth state.
    async fn get_auth(&self) -> Result<AuthState, OperationError>;

    /// Derive the operation to send given `state`.
    fn add_auth_to_operation(&self, operation: Operation, state: &AuthState) -> Operation {
        add_bearer_token(operation, state)
    }
}

/// Bearer-token auth over any [`TokenSource`].
#[derive(Clone)]
pub struct BearerAuth {
    source: Arc<dyn TokenSource>,
}

impl BearerAuth {
    /// Auth drawing tokens from `source`.
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthConfig for BearerAuth {
    async fn get_auth(&self) -> Result<AuthState, OperationError> {
        Ok(AuthState {
            token: self.source.id_token().await?,
        })
    }
}

/// Copy of `operation` carrying `state`'s token as a bearer header.
///
/// Without a token the operation is returned as is, deferred options
/// included. With one, options are materialized, existing headers kept and
/// any earlier `Authorization` value replaced.
pub fn add_bearer_token(operation: Operation, state: &AuthState) -> Operation {
    let Some(token) = state.token.as_deref() else {
        return operation;
    };
    let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) else {
        warn!(key = %operation.key, "token is not a valid header value, sending without it");
        return operation;
    };
    value.set_sensitive(true);

    let mut options = operation.context.fetch_options.materialize();
    let _ = options.headers.insert(AUTHORIZATION, value);

    let mut context = operation.context.clone();
    context.fetch_options = FetchOptions::Static(options);
    operation.with_context(context)
}

/// Runs every operation through an [`AuthConfig`] before forwarding it.
pub struct AuthExchange {
    config: Arc<dyn AuthConfig>,
}

impl AuthExchange {
    /// Exchange applying `config`.
    pub fn new(config: Arc<dyn AuthConfig>) -> Self {
        Self { config }
    }
}

impl Exchange for AuthExchange {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn run(&self, operation: Operation, forward: Forward) -> ResultStream {
        if !self.config.should_attempt_auth(&operation) {
            return forward.call(operation);
        }
        let config = Arc::clone(&self.config);
        async_stream::stream! {
            match config.get_auth().await {
                Ok(state) => {
                    debug!(key = %operation.key, authenticated = state.token.is_some(), "auth state fetched");
                    let mut upstream = forward.call(config.add_auth_to_operation(operation, &state));
                    while let Some(result) = upstream.next().await {
                        yield result;
                    }
                }
                Err(e) => {
                    warn!(key = %operation.key, "auth state unavailable: {e}");
                    yield OperationResult::from_error(&operation, e);
                }
            }
        }
        .boxed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
