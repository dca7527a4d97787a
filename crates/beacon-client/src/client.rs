//! The client facade over the exchange chain.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    FetchOptions, GraphQLRequest, Operation, OperationContext, OperationError, OperationKind,
    OperationResult, RequestOptions, RequestPolicy, SubscriptionForwarder, TokenSource,
};
use beacon_settings::ApiSettings;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::{AuthConfig, AuthExchange, BearerAuth};
use crate::cache::{CacheExchange, DocumentCache};
use crate::dedup::DedupExchange;
use crate::documents::GraphQLDocument;
use crate::exchange::{Exchange, Forward, ResultStream};
use crate::fetch::FetchExchange;
use crate::subscription::SubscriptionExchange;

/// GraphQL client.
///
/// Cheap to clone; clones share the exchange chain and its cache.
#[derive(Clone)]
pub struct Client {
    url: String,
    request_policy: RequestPolicy,
    fetch_options: FetchOptions,
    chain: Arc<[Arc<dyn Exchange>]>,
    cache: Option<Arc<Mutex<DocumentCache>>>,
}

impl Client {
    /// Builder for a client talking to `url`.
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    /// Endpoint for queries and mutations.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Names of the exchanges in the chain, in order.
    pub fn exchange_names(&self) -> Vec<&'static str> {
        Forward::new(Arc::clone(&self.chain)).remaining()
    }

    /// Operation for `request` carrying this client's default context.
    pub fn create_operation(&self, kind: OperationKind, request: GraphQLRequest) -> Operation {
        Operation::new(
            kind,
            request,
            OperationContext {
                url: self.url.clone(),
                request_policy: self.request_policy,
                fetch_options: self.fetch_options.clone(),
                additional_typenames: Vec::new(),
            },
        )
    }

    /// Run `operation` through the chain.
    pub fn execute(&self, operation: Operation) -> ResultStream {
        debug!(kind = %operation.kind, key = %operation.key, name = ?operation.name(), "executing operation");
        Forward::new(Arc::clone(&self.chain)).call(operation)
    }

    /// Run a query with the default request policy.
    pub async fn query(&self, request: GraphQLRequest) -> OperationResult {
        self.query_with_policy(request, self.request_policy).await
    }

    /// Run a query with `policy`. Resolves to the first non-stale result.
    pub async fn query_with_policy(
        &self,
        request: GraphQLRequest,
        policy: RequestPolicy,
    ) -> OperationResult {
        let operation = self
            .create_operation(OperationKind::Query, request)
            .with_request_policy(policy);
        first_settled(&operation, self.execute(operation.clone())).await
    }

    /// Run a typed query and deserialize its data.
    pub async fn query_as<D: GraphQLDocument>(
        &self,
        variables: &D::Variables,
    ) -> Result<D::Data, OperationError> {
        let result = self.query(D::request(variables)).await;
        typed_data(&result)
    }

    /// Run a mutation. Resolves to its first result.
    pub async fn mutation(&self, request: GraphQLRequest) -> OperationResult {
        let operation = self.create_operation(OperationKind::Mutation, request);
        first_settled(&operation, self.execute(operation.clone())).await
    }

    /// Start a subscription. Results arrive until the stream is dropped or
    /// the transport ends it.
    pub fn subscription(&self, request: GraphQLRequest) -> ResultStream {
        self.execute(self.create_operation(OperationKind::Subscription, request))
    }

    /// Drop every cached query result.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
            debug!("document cache cleared");
        }
    }

    /// Number of cached query results.
    pub fn cached_results(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("request_policy", &self.request_policy)
            .field("exchanges", &self.exchange_names())
            .finish_non_exhaustive()
    }
}

/// Deserialize a result's data, failing with the result's error if any.
pub(crate) fn typed_data<T: DeserializeOwned>(result: &OperationResult) -> Result<T, OperationError> {
    if let Some(error) = &result.error {
        return Err(error.clone());
    }
    result.data_as()
}

async fn first_settled(operation: &Operation, mut results: ResultStream) -> OperationResult {
    while let Some(result) = results.next().await {
        if !result.stale {
            return result;
        }
    }
    OperationResult::from_error(
        operation,
        OperationError::network("operation ended without a result"),
    )
}

/// Configures a [`Client`].
///
/// The default chain is dedup, cache, auth (when a token source or auth
/// config is set), fetch and subscription (when a forwarder is set).
pub struct ClientBuilder {
    url: String,
    http: Option<reqwest::Client>,
    auth: Option<Arc<dyn AuthConfig>>,
    forwarder: Option<Arc<dyn SubscriptionForwarder>>,
    request_policy: RequestPolicy,
    fetch_options: FetchOptions,
    exchanges: Option<Vec<Arc<dyn Exchange>>>,
}

impl ClientBuilder {
    /// Builder for `url` with no auth and no subscription transport.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: None,
            auth: None,
            forwarder: None,
            request_policy: RequestPolicy::default(),
            fetch_options: FetchOptions::default(),
            exchanges: None,
        }
    }

    /// Builder for the configured API endpoint and request timeout.
    pub fn from_settings(settings: &ApiSettings) -> Self {
        let builder = Self::new(settings.endpoint());
        match settings.request_timeout_ms {
            Some(ms) => builder.fetch_options(
                RequestOptions::default()
                    .with_timeout(Duration::from_millis(ms))
                    .into(),
            ),
            None => builder,
        }
    }

    /// HTTP client used by the fetch exchange.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Auth policy.
    #[must_use]
    pub fn auth(mut self, config: Arc<dyn AuthConfig>) -> Self {
        self.auth = Some(config);
        self
    }

    /// Bearer-token auth over `source`.
    #[must_use]
    pub fn token_source(self, source: Arc<dyn TokenSource>) -> Self {
        self.auth(Arc::new(BearerAuth::new(source)))
    }

    /// Transport for subscriptions.
    #[must_use]
    pub fn subscriptions(mut self, forwarder: Arc<dyn SubscriptionForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Default request policy for queries.
    #[must_use]
    pub fn request_policy(mut self, policy: RequestPolicy) -> Self {
        self.request_policy = policy;
        self
    }

    /// Default fetch options for every operation.
    #[must_use]
    pub fn fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    /// Replace the default chain entirely.
    #[must_use]
    pub fn exchanges(mut self, exchanges: Vec<Arc<dyn Exchange>>) -> Self {
        self.exchanges = Some(exchanges);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let (chain, cache) = match self.exchanges {
            Some(exchanges) => (exchanges, None),
            None => {
                let cache_exchange = CacheExchange::new();
                let cache = cache_exchange.cache();
                let mut chain: Vec<Arc<dyn Exchange>> = Vec::with_capacity(5);
                chain.push(Arc::new(DedupExchange::new()));
                chain.push(Arc::new(cache_exchange));
                if let Some(auth) = self.auth {
                    chain.push(Arc::new(AuthExchange::new(auth)));
                }
                chain.push(Arc::new(FetchExchange::new(self.http.unwrap_or_default())));
                if let Some(forwarder) = self.forwarder {
                    chain.push(Arc::new(SubscriptionExchange::new(forwarder)));
                }
                (chain, Some(cache))
            }
        };

        Client {
            url: self.url,
            request_policy: self.request_policy,
            fetch_options: self.fetch_options,
            chain: chain.into(),
            cache,
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("auth", &self.auth.is_some())
            .field("subscriptions", &self.forwarder.is_some())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
