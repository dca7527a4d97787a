//! Document cache keyed by operation.
//!
//! Query results are stored whole, indexed by the `__typename`s found in
//! their data. A mutation result invalidates every cached query that shares
//! one of its typenames (plus the mutation's `additional_typenames`).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use beacon_core::{Operation, OperationKey, OperationKind, OperationResult, RequestPolicy};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::exchange::{Exchange, Forward, ResultStream};

/// Every `__typename` string anywhere in `value`.
pub fn collect_typenames(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk_typenames(value, &mut out);
    out
}

fn walk_typenames(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "__typename" {
                    if let Value::String(name) = child {
                        let _ = out.insert(name.clone());
                    }
                } else {
                    walk_typenames(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| walk_typenames(item, out)),
        _ => {}
    }
}

struct Entry {
    result: OperationResult,
    typenames: BTreeSet<String>,
}

/// Cached query results and their typename index.
#[derive(Default)]
pub struct DocumentCache {
    entries: HashMap<OperationKey, Entry>,
    by_typename: HashMap<String, HashSet<OperationKey>>,
}

impl DocumentCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `key`.
    pub fn get(&self, key: OperationKey) -> Option<&OperationResult> {
        self.entries.get(&key).map(|e| &e.result)
    }

    /// Store `result` under `key`, replacing an earlier entry.
    pub fn insert(&mut self, key: OperationKey, result: OperationResult) {
        let typenames = result
            .data
            .as_ref()
            .map(collect_typenames)
            .unwrap_or_default();
        self.unindex(key);
        for name in &typenames {
            let _ = self.by_typename.entry(name.clone()).or_default().insert(key);
        }
        let _ = self.entries.insert(key, Entry { result, typenames });
    }

    /// Drop every entry that mentions one of `typenames`. Returns the keys
    /// that were removed.
    pub fn invalidate<'a>(&mut self, typenames: impl IntoIterator<Item = &'a str>) -> Vec<OperationKey> {
        let mut doomed: BTreeSet<OperationKey> = BTreeSet::new();
        for name in typenames {
            if let Some(keys) = self.by_typename.get(name) {
                doomed.extend(keys.iter().copied());
            }
        }
        for key in &doomed {
            self.remove(*key);
        }
        doomed.into_iter().collect()
    }

    /// Drop one entry.
    pub fn remove(&mut self, key: OperationKey) {
        self.unindex(key);
        let _ = self.entries.remove(&key);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_typename.clear();
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unindex(&mut self, key: OperationKey) {
        let Some(entry) = self.entries.get(&key) else {
            return;
        };
        for name in &entry.typenames {
            if let Some(keys) = self.by_typename.get_mut(name) {
                let _ = keys.remove(&key);
                if keys.is_empty() {
                    let _ = self.by_typename.remove(name);
                }
            }
        }
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.entries.len())
            .field("typenames", &self.by_typename.len())
            .finish()
    }
}

/// Serves queries from a [`DocumentCache`] according to their request
/// policy and invalidates it on mutation results.
#[derive(Clone, Default)]
pub struct CacheExchange {
    cache: Arc<Mutex<DocumentCache>>,
}

impl CacheExchange {
    /// Exchange over a fresh cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the underlying cache.
    pub fn cache(&self) -> Arc<Mutex<DocumentCache>> {
        Arc::clone(&self.cache)
    }

    fn run_query(&self, operation: Operation, forward: Forward) -> ResultStream {
        let cache = Arc::clone(&self.cache);
        let policy = operation.context.request_policy;
        async_stream::stream! {
            let cached = cache
                .lock()
                .get(operation.key)
                .map(|r| r.clone().for_operation(&operation));
            trace!(key = %operation.key, ?policy, hit = cached.is_some(), "cache lookup");

            match (policy, cached) {
                (RequestPolicy::CacheFirst | RequestPolicy::CacheOnly, Some(hit)) => {
                    yield hit;
                    return;
                }
                (RequestPolicy::CacheOnly, None) => {
                    yield OperationResult::empty(&operation);
                    return;
                }
                (RequestPolicy::CacheAndNetwork, Some(hit)) => yield hit.into_stale(),
                _ => {}
            }

            let mut upstream = forward.call(operation.clone());
            while let Some(result) = upstream.next().await {
                if result.data.is_some() && !result.is_network_error() {
                    cache.lock().insert(operation.key, result.clone());
                }
                yield result;
            }
        }
        .boxed()
    }

    fn run_mutation(&self, operation: Operation, forward: Forward) -> ResultStream {
        let cache = Arc::clone(&self.cache);
        let additional = operation.context.additional_typenames.clone();
        forward
            .call(operation)
            .map(move |result| {
                if !result.is_network_error() {
                    let mut typenames = result
                        .data
                        .as_ref()
                        .map(collect_typenames)
                        .unwrap_or_default();
                    typenames.extend(additional.iter().cloned());
                    let removed = cache.lock().invalidate(typenames.iter().map(String::as_str));
                    if !removed.is_empty() {
                        debug!(count = removed.len(), ?typenames, "invalidated cached queries");
                    }
                }
                result
            })
            .boxed()
    }
}

impl Exchange for CacheExchange {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn run(&self, operation: Operation, forward: Forward) -> ResultStream {
        match operation.kind {
            OperationKind::Query => self.run_query(operation, forward),
            OperationKind::Mutation => self.run_mutation(operation, forward),
            OperationKind::Subscription => forward.call(operation),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
