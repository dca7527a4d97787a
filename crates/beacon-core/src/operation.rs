//! GraphQL operations as they travel through the client pipeline.
//!
//! An [`Operation`] is created once per request by the caller and then handed
//! from exchange to exchange. Exchanges never mutate an operation in place;
//! they derive a new one (see [`Operation::with_context`]) when they need to
//! change its transport context.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::graphql::GraphQLRequest;

// ─────────────────────────────────────────────────────────────────────────────
// Kind & key
// ─────────────────────────────────────────────────────────────────────────────

/// The three GraphQL operation types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read-only request, cacheable.
    Query,
    /// Side-effecting request, never deduplicated or cached.
    Mutation,
    /// Long-lived push stream delivered over the realtime transport.
    Subscription,
}

impl OperationKind {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of an operation: kind + document + variables.
///
/// Two operations with the same key are interchangeable for deduplication and
/// caching. Whitespace differences in the document and key order in the
/// variables do not change the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(u64);

impl OperationKey {
    /// Compute the key for a request of the given kind.
    pub fn compute(kind: OperationKind, request: &GraphQLRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(normalize_document(&request.query).as_bytes());
        hasher.update([0]);
        hasher.update(canonical_json(&request.variables).as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Raw 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Collapse every whitespace run to a single space.
fn normalize_document(document: &str) -> String {
    document.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serialize JSON with object keys sorted, independent of map ordering.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// How the cache exchange treats a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPolicy {
    /// Serve from cache when possible, otherwise fetch.
    #[default]
    CacheFirst,
    /// Serve from cache only; a miss yields an empty result.
    CacheOnly,
    /// Always fetch, refreshing the cache.
    NetworkOnly,
    /// Serve a stale cached result first, then fetch.
    CacheAndNetwork,
}

/// Materialized transport options for the HTTP fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Per-request timeout. `None` uses the HTTP client's default.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Builder-style header insertion (replaces an existing value).
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        let _ = self.headers.insert(name, value);
        self
    }

    /// Builder-style timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Provider invoked to produce request options lazily.
pub type DeferredOptions = Arc<dyn Fn() -> RequestOptions + Send + Sync>;

/// Transport options: either a plain value or a provider called on demand.
#[derive(Clone)]
pub enum FetchOptions {
    /// Options known up front.
    Static(RequestOptions),
    /// Options computed when the request is dispatched.
    Deferred(DeferredOptions),
}

impl FetchOptions {
    /// Wrap a closure as deferred options.
    pub fn deferred(provider: impl Fn() -> RequestOptions + Send + Sync + 'static) -> Self {
        Self::Deferred(Arc::new(provider))
    }

    /// Produce a plain options value, invoking the provider if deferred.
    pub fn materialize(&self) -> RequestOptions {
        match self {
            Self::Static(options) => options.clone(),
            Self::Deferred(provider) => provider(),
        }
    }

    /// Whether these options are produced by a provider.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::Static(RequestOptions::default())
    }
}

impl From<RequestOptions> for FetchOptions {
    fn from(options: RequestOptions) -> Self {
        Self::Static(options)
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(options) => f.debug_tuple("Static").field(options).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Per-operation transport context.
#[derive(Clone, Debug, Default)]
pub struct OperationContext {
    /// HTTP endpoint for queries and mutations.
    pub url: String,
    /// Cache behaviour for queries.
    pub request_policy: RequestPolicy,
    /// Headers and timeout for the HTTP fetch.
    pub fetch_options: FetchOptions,
    /// Typenames a mutation should invalidate in addition to the ones found
    /// in its result.
    pub additional_typenames: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────────────────

/// A query, mutation or subscription plus its transport context.
#[derive(Clone, Debug)]
pub struct Operation {
    /// Stable identity used by dedup and cache.
    pub key: OperationKey,
    /// Operation type.
    pub kind: OperationKind,
    /// Document, operation name and variables.
    pub request: GraphQLRequest,
    /// Transport context.
    pub context: OperationContext,
}

impl Operation {
    /// Create an operation, computing its key.
    pub fn new(kind: OperationKind, request: GraphQLRequest, context: OperationContext) -> Self {
        Self {
            key: OperationKey::compute(kind, &request),
            kind,
            request,
            context,
        }
    }

    /// Copy of this operation with a replaced context. Key, kind and request
    /// are preserved.
    #[must_use]
    pub fn with_context(&self, context: OperationContext) -> Self {
        Self {
            key: self.key,
            kind: self.kind,
            request: self.request.clone(),
            context,
        }
    }

    /// Copy of this operation with another request policy.
    #[must_use]
    pub fn with_request_policy(mut self, policy: RequestPolicy) -> Self {
        self.context.request_policy = policy;
        self
    }

    /// The operation name, if the request carries one.
    pub fn name(&self) -> Option<&str> {
        self.request.operation_name.as_deref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
