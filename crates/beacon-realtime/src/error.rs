//! Transport error types.

use beacon_core::{GraphQLError, OperationError};
use serde_json::Value;
use thiserror::Error;

/// Errors from the socket, channels and subscription registration.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Socket URL.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The socket is closed.
    #[error("socket closed")]
    Closed,

    /// Operation timed out.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The server replied with a non-`ok` status.
    #[error("{event} on {topic} rejected: {response}")]
    Rejected {
        /// Channel topic.
        topic: String,
        /// Pushed event.
        event: String,
        /// Reply `response` payload.
        response: Value,
    },

    /// The control channel is not joined.
    #[error("control channel not ready: {0}")]
    NotReady(String),

    /// A route for the topic already exists on this socket.
    #[error("channel for topic '{0}' already exists")]
    DuplicateChannel(String),

    /// A `doc` acknowledgement carried no `subscriptionId`.
    #[error("subscription acknowledged without a subscriptionId")]
    MissingSubscriptionId,

    /// A frame could not be encoded or decoded.
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<TransportError> for OperationError {
    fn from(err: TransportError) -> Self {
        if let TransportError::Rejected { response, .. } = &err {
            let errors: Vec<GraphQLError> = response
                .get("errors")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            if !errors.is_empty() {
                return OperationError::GraphQL { errors };
            }
        }
        OperationError::transport(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout {
            timeout_ms: 10_000,
            context: "doc registration".to_string(),
        };
        assert_eq!(err.to_string(), "timed out after 10000ms: doc registration");
    }

    #[test]
    fn rejected_doc_with_errors_becomes_graphql_error() {
        let err = TransportError::Rejected {
            topic: "__absinthe__:control".to_string(),
            event: "doc".to_string(),
            response: json!({"errors": [{"message": "Cannot query field \"nope\""}]}),
        };
        let op: OperationError = err.into();
        assert_matches!(op, OperationError::GraphQL { ref errors } if errors[0].message.contains("nope"));
    }

    #[test]
    fn other_errors_become_transport_errors() {
        let op: OperationError = TransportError::Closed.into();
        assert_eq!(op, OperationError::transport("socket closed"));

        let op: OperationError = TransportError::Rejected {
            topic: "t".to_string(),
            event: "phx_join".to_string(),
            response: json!({"reason": "unauthorized"}),
        }
        .into();
        assert_eq!(op.category(), "transport");
    }
}
