//! HTTP transport for queries and mutations.

use beacon_core::{
    GraphQLResponse, Operation, OperationError, OperationKind, OperationResult,
};
use futures::StreamExt;
use futures::stream;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{debug, warn};

use crate::exchange::{Exchange, Forward, ResultStream};

const ACCEPT_GRAPHQL: &str = "application/graphql-response+json, application/json";

/// POSTs queries and mutations to the operation's URL. Subscriptions are
/// forwarded.
#[derive(Clone, Debug, Default)]
pub struct FetchExchange {
    http: reqwest::Client,
}

impl FetchExchange {
    /// Exchange sending through `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Exchange for FetchExchange {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn run(&self, operation: Operation, forward: Forward) -> ResultStream {
        if operation.kind == OperationKind::Subscription {
            return forward.call(operation);
        }
        let http = self.http.clone();
        stream::once(async move { execute_fetch(&http, &operation).await }).boxed()
    }
}

/// Send one operation and turn the reply into a result.
///
/// A body that parses as a GraphQL response carrying data or errors is a
/// result whatever the HTTP status; anything else is a network error.
#[tracing::instrument(skip_all, fields(key = %operation.key, name = ?operation.name()))]
async fn execute_fetch(http: &reqwest::Client, operation: &Operation) -> OperationResult {
    let options = operation.context.fetch_options.materialize();
    let mut request = http
        .post(&operation.context.url)
        .header(ACCEPT, HeaderValue::from_static(ACCEPT_GRAPHQL))
        .headers(options.headers)
        .json(&operation.request);
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("request failed: {e}");
            return OperationResult::from_error(operation, e.into());
        }
    };
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = status.as_u16(), "failed to read response body: {e}");
            return OperationResult::from_error(operation, e.into());
        }
    };

    match serde_json::from_slice::<GraphQLResponse>(&body) {
        Ok(payload) if payload.is_well_formed() => {
            debug!(status = status.as_u16(), errors = payload.errors.len(), "response received");
            OperationResult::from_response(operation, payload)
        }
        _ => {
            let message = status
                .canonical_reason()
                .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string);
            warn!(status = status.as_u16(), "response is not a GraphQL payload");
            OperationResult::from_error(
                operation,
                OperationError::Network {
                    message,
                    status: Some(status.as_u16()),
                },
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
