//! The exchange abstraction and the chain that links exchanges together.

use std::sync::Arc;

use beacon_core::{Operation, OperationError, OperationResult};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::warn;

/// Results produced for one operation. Dropping the stream cancels the
/// operation.
pub type ResultStream = BoxStream<'static, OperationResult>;

/// One stage of the pipeline.
///
/// An exchange either produces results for an operation itself or calls
/// `forward` with the (possibly rewritten) operation and passes the
/// downstream results back up.
pub trait Exchange: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Handle `operation`.
    fn run(&self, operation: Operation, forward: Forward) -> ResultStream;
}

/// The remainder of the chain after the current exchange.
#[derive(Clone)]
pub struct Forward {
    chain: Arc<[Arc<dyn Exchange>]>,
    index: usize,
}

impl Forward {
    /// Entry point of `chain`.
    pub fn new(chain: Arc<[Arc<dyn Exchange>]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Send `operation` to the next exchange. Past the end of the chain the
    /// operation fails with a network error.
    pub fn call(&self, operation: Operation) -> ResultStream {
        let Some(exchange) = self.chain.get(self.index) else {
            warn!(kind = %operation.kind, key = %operation.key, "no exchange handled operation");
            let error = OperationError::network(format!(
                "no exchange handled the {} operation",
                operation.kind
            ));
            return stream::iter([OperationResult::from_error(&operation, error)]).boxed();
        };
        let next = Self {
            chain: Arc::clone(&self.chain),
            index: self.index + 1,
        };
        exchange.run(operation, next)
    }

    /// Names of the exchanges still ahead.
    pub fn remaining(&self) -> Vec<&'static str> {
        self.chain
            .iter()
            .skip(self.index)
            .map(|e| e.name())
            .collect()
    }
}

impl std::fmt::Debug for Forward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forward")
            .field("remaining", &self.remaining())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use beacon_core::{GraphQLRequest, GraphQLResponse, OperationContext, OperationKind};
    use serde_json::{Value, json};

    /// Terminal exchange answering every operation with fixed data and
    /// counting how often it ran.
    pub(crate) struct Answer {
        pub(crate) data: Value,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl Answer {
        pub(crate) fn new(data: Value) -> (Arc<dyn Exchange>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let exchange = Arc::new(Self {
                data,
                calls: Arc::clone(&calls),
            });
            (exchange, calls)
        }
    }

    impl Exchange for Answer {
        fn name(&self) -> &'static str {
            "answer"
        }

        fn run(&self, operation: Operation, _forward: Forward) -> ResultStream {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = GraphQLResponse {
                data: Some(self.data.clone()),
                ..GraphQLResponse::default()
            };
            stream::iter([OperationResult::from_response(&operation, response)]).boxed()
        }
    }

    pub(crate) fn query(document: &str) -> Operation {
        Operation::new(
            OperationKind::Query,
            GraphQLRequest::new(document),
            OperationContext::default(),
        )
    }

    pub(crate) fn chain(exchanges: Vec<Arc<dyn Exchange>>) -> Forward {
        Forward::new(exchanges.into())
    }

    #[tokio::test]
    async fn empty_chain_fails_with_network_error() {
        let results: Vec<_> = chain(vec![]).call(query("{ a }")).collect().await;
        assert_eq!(results.len(), 1);
        assert_matches!(results[0].error, Some(OperationError::Network { .. }));
    }

    #[tokio::test]
    async fn terminal_exchange_answers() {
        let (answer, calls) = Answer::new(json!({"a": 1}));
        let results: Vec<_> = chain(vec![answer]).call(query("{ a }")).collect().await;
        assert_eq!(results[0].data, Some(json!({"a": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_operation_is_logged() {
        let (logs, _guard) = beacon_core::logging::capture_logs();
        let _ = chain(vec![]).call(query("{ a }"));
        assert!(logs.has_event(tracing::Level::WARN, "no exchange handled"));
    }

    #[test]
    fn forward_reports_remaining_exchanges() {
        let (answer, _) = Answer::new(json!({}));
        let forward = chain(vec![answer]);
        assert_eq!(forward.remaining(), ["answer"]);
    }
}
