//! Results delivered by the pipeline and the error taxonomy they carry.
//!
//! Pipeline failures are values, not panics or `Err` returns: every operation
//! ends in an [`OperationResult`], and `result.error` says whether it
//! completed or failed.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::graphql::{GraphQLError, GraphQLResponse};
use crate::operation::Operation;

/// Why an operation failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OperationError {
    /// The request never produced a GraphQL payload.
    #[error("[Network] {message}")]
    Network {
        /// Error description.
        message: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
    },

    /// The server reported errors inside a well-formed response.
    #[error("[GraphQL] {}", join_messages(.errors))]
    GraphQL {
        /// Reported errors, in server order.
        errors: Vec<GraphQLError>,
    },

    /// A token could not be obtained or attached.
    #[error("[Auth] {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// The realtime transport failed to register or deliver a subscription.
    #[error("[Transport] {message}")]
    Transport {
        /// Error description.
        message: String,
    },
}

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl OperationError {
    /// Network failure without an HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Token fetch/attachment failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Realtime transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::GraphQL { .. } => "graphql",
            Self::Auth { .. } => "auth",
            Self::Transport { .. } => "transport",
        }
    }

    /// Server-reported GraphQL errors, empty for other categories.
    pub fn graphql_errors(&self) -> &[GraphQLError] {
        match self {
            Self::GraphQL { errors } => errors,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for OperationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Outcome of one step of an operation's result stream.
#[derive(Clone, Debug)]
pub struct OperationResult {
    /// The operation this result answers.
    pub operation: Operation,
    /// Result data (possibly partial when `error` is a GraphQL error).
    pub data: Option<Value>,
    /// Failure, if any.
    pub error: Option<OperationError>,
    /// Server extensions.
    pub extensions: Option<Value>,
    /// `true` when served from cache while a fresher result is on its way.
    pub stale: bool,
}

impl OperationResult {
    /// Result built from a GraphQL payload.
    pub fn from_response(operation: &Operation, response: GraphQLResponse) -> Self {
        let error = (!response.errors.is_empty()).then_some(OperationError::GraphQL {
            errors: response.errors,
        });
        Self {
            operation: operation.clone(),
            data: response.data,
            error,
            extensions: response.extensions,
            stale: false,
        }
    }

    /// Failed result with no data.
    pub fn from_error(operation: &Operation, error: OperationError) -> Self {
        Self {
            operation: operation.clone(),
            data: None,
            error: Some(error),
            extensions: None,
            stale: false,
        }
    }

    /// Result with neither data nor error (cache-only miss).
    pub fn empty(operation: &Operation) -> Self {
        Self {
            operation: operation.clone(),
            data: None,
            error: None,
            extensions: None,
            stale: false,
        }
    }

    /// Same payload re-addressed to another operation.
    #[must_use]
    pub fn for_operation(mut self, operation: &Operation) -> Self {
        self.operation = operation.clone();
        self
    }

    /// Mark as stale.
    #[must_use]
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Whether the operation failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the failure happened below the GraphQL layer.
    pub fn is_network_error(&self) -> bool {
        matches!(self.error, Some(OperationError::Network { .. }))
    }

    /// Deserialize `data` into a typed shape.
    ///
    /// Fails with the operation's error when there is no data, or with a
    /// network-category error when the data does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, OperationError> {
        let Some(data) = &self.data else {
            return Err(self
                .error
                .clone()
                .unwrap_or_else(|| OperationError::network("result has no data")));
        };
        serde_json::from_value(data.clone())
            .map_err(|e| OperationError::network(format!("unexpected result shape: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
