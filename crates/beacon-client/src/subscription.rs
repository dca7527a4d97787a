//! Routes subscription operations to the realtime transport.

use std::sync::Arc;

use beacon_core::{Operation, OperationKind, OperationResult, SubscriptionForwarder};
use futures::StreamExt;
use tracing::debug;

use crate::exchange::{Exchange, Forward, ResultStream};

/// Hands subscriptions to a [`SubscriptionForwarder`]; everything else is
/// forwarded.
pub struct SubscriptionExchange {
    forwarder: Arc<dyn SubscriptionForwarder>,
}

impl SubscriptionExchange {
    /// Exchange forwarding to `forwarder`.
    pub fn new(forwarder: Arc<dyn SubscriptionForwarder>) -> Self {
        Self { forwarder }
    }
}

impl Exchange for SubscriptionExchange {
    fn name(&self) -> &'static str {
        "subscription"
    }

    fn run(&self, operation: Operation, forward: Forward) -> ResultStream {
        if operation.kind != OperationKind::Subscription {
            return forward.call(operation);
        }
        debug!(key = %operation.key, name = ?operation.name(), "forwarding subscription");
        self.forwarder
            .forward_subscription(operation.request.clone())
            .map(move |item| match item {
                Ok(response) => OperationResult::from_response(&operation, response),
                Err(e) => OperationResult::from_error(&operation, e),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use beacon_core::{
        GraphQLRequest, GraphQLResponse, OperationContext, OperationError, SubscriptionStream,
    };
    use futures::stream;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::exchange::tests::{Answer, query};

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<GraphQLRequest>>,
    }

    impl SubscriptionForwarder for Recorder {
        fn forward_subscription(&self, request: GraphQLRequest) -> SubscriptionStream {
            self.requests.lock().push(request);
            stream::iter([
                Ok(GraphQLResponse {
                    data: Some(json!({"newUser": {"id": "1", "name": "Ada"}})),
                    ..GraphQLResponse::default()
                }),
                Err(OperationError::transport("socket closed")),
            ])
            .boxed()
        }
    }

    #[tokio::test]
    async fn subscription_payloads_become_results() {
        let recorder = Arc::new(Recorder::default());
        let exchange = SubscriptionExchange::new(recorder.clone());
        let op = Operation::new(
            OperationKind::Subscription,
            GraphQLRequest::new("subscription NewUser { newUser { id name } }"),
            OperationContext::default(),
        );

        let results: Vec<_> = exchange.run(op, Forward::new(Vec::new().into())).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data.as_ref().unwrap()["newUser"]["name"], "Ada");
        assert_matches!(results[1].error, Some(OperationError::Transport { .. }));
        assert_eq!(
            recorder.requests.lock()[0].operation_name.as_deref(),
            Some("NewUser")
        );
    }

    #[tokio::test]
    async fn queries_pass_through() {
        let recorder = Arc::new(Recorder::default());
        let (answer, _) = Answer::new(json!({"a": 1}));
        let results: Vec<_> = SubscriptionExchange::new(recorder.clone())
            .run(query("{ a }"), Forward::new(vec![answer].into()))
            .collect()
            .await;
        assert_eq!(results[0].data, Some(json!({"a": 1})));
        assert!(recorder.requests.lock().is_empty());
    }
}
