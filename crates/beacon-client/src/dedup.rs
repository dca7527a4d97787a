//! Deduplication of identical in-flight operations.
//!
//! Queries and subscriptions with the same [`OperationKey`] share a single
//! upstream execution while it is in flight. Late query subscribers first
//! receive every result produced so far; late subscription subscribers only
//! see results from the moment they join. The upstream execution is
//! cancelled when its last subscriber goes away. Mutations are never shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use beacon_core::{Operation, OperationKey, OperationKind, OperationResult};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exchange::{Exchange, Forward, ResultStream};

const CHANNEL_CAPACITY: usize = 64;

type InflightTable = Arc<Mutex<HashMap<OperationKey, Inflight>>>;

struct Inflight {
    id: u64,
    sender: broadcast::Sender<OperationResult>,
    /// Results so far, replayed to late query subscribers.
    history: Vec<OperationResult>,
    keep_history: bool,
    subscribers: usize,
    cancel: CancellationToken,
}

/// Shares one upstream execution between identical operations.
#[derive(Default)]
pub struct DedupExchange {
    inflight: InflightTable,
    ids: AtomicU64,
}

impl DedupExchange {
    /// Empty dedup table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct operations currently in flight.
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Join the execution for `operation`, starting it if needed. Returns
    /// the replay prefix, the live receiver and the subscriber's lease.
    fn join(
        &self,
        operation: &Operation,
        forward: &Forward,
    ) -> (Vec<OperationResult>, broadcast::Receiver<OperationResult>, Lease) {
        let mut table = self.inflight.lock();

        if let Some(entry) = table.get_mut(&operation.key) {
            entry.subscribers += 1;
            debug!(key = %operation.key, subscribers = entry.subscribers, "joined in-flight operation");
            let lease = Lease {
                table: Arc::clone(&self.inflight),
                key: operation.key,
                id: entry.id,
            };
            return (entry.history.clone(), entry.sender.subscribe(), lease);
        }

        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let _ = table.insert(
            operation.key,
            Inflight {
                id,
                sender,
                history: Vec::new(),
                keep_history: operation.kind == OperationKind::Query,
                subscribers: 1,
                cancel: cancel.clone(),
            },
        );
        drop(table);

        let upstream = forward.call(operation.clone());
        let _driver = tokio::spawn(drive(
            Arc::clone(&self.inflight),
            operation.key,
            id,
            upstream,
            cancel,
        ));

        let lease = Lease {
            table: Arc::clone(&self.inflight),
            key: operation.key,
            id,
        };
        (Vec::new(), receiver, lease)
    }
}

impl Exchange for DedupExchange {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn run(&self, operation: Operation, forward: Forward) -> ResultStream {
        if operation.kind == OperationKind::Mutation {
            return forward.call(operation);
        }

        let (replay, mut receiver, lease) = self.join(&operation, &forward);
        async_stream::stream! {
            let _lease = lease;
            for result in replay {
                yield result.for_operation(&operation);
            }
            loop {
                match receiver.recv().await {
                    Ok(result) => yield result.for_operation(&operation),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(key = %operation.key, skipped, "subscriber lagged, results dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }
}

/// Pump upstream results into the shared channel until upstream ends or
/// every subscriber has left.
async fn drive(
    table: InflightTable,
    key: OperationKey,
    id: u64,
    mut upstream: ResultStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(%key, "upstream cancelled");
                break;
            }
            next = upstream.next() => {
                let Some(result) = next else { break };
                let mut table = table.lock();
                let Some(entry) = table.get_mut(&key).filter(|e| e.id == id) else {
                    break;
                };
                if entry.keep_history {
                    entry.history.push(result.clone());
                }
                let _ = entry.sender.send(result);
            }
        }
    }

    let mut table = table.lock();
    if table.get(&key).is_some_and(|e| e.id == id) {
        let _ = table.remove(&key);
    }
}

/// A subscriber's share of an execution.
struct Lease {
    table: InflightTable,
    key: OperationKey,
    id: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(&self.key).filter(|e| e.id == self.id) else {
            return;
        };
        entry.subscribers -= 1;
        if entry.subscribers == 0 {
            entry.cancel.cancel();
            let _ = table.remove(&self.key);
            debug!(key = %self.key, "last subscriber left");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use beacon_core::{GraphQLRequest, GraphQLResponse, OperationContext};
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::exchange::tests::{Answer, query};

    /// Upstream whose results are fed by the test.
    struct Manual {
        feeds: Mutex<Vec<mpsc::UnboundedReceiver<OperationResult>>>,
        calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Exchange for Manual {
        fn name(&self) -> &'static str {
            "manual"
        }

        fn run(&self, _operation: Operation, _forward: Forward) -> ResultStream {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut feed = self.feeds.lock().remove(0);
            let guard = DropCounter(Arc::clone(&self.dropped));
            async_stream::stream! {
                let _guard = guard;
                while let Some(result) = feed.recv().await {
                    yield result;
                }
            }
            .boxed()
        }
    }

    struct Setup {
        dedup: Arc<DedupExchange>,
        forward: Forward,
        feed: mpsc::UnboundedSender<OperationResult>,
        calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    fn manual_setup() -> Setup {
        let (feed, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let manual: Arc<dyn Exchange> = Arc::new(Manual {
            feeds: Mutex::new(vec![rx]),
            calls: Arc::clone(&calls),
            dropped: Arc::clone(&dropped),
        });
        Setup {
            dedup: Arc::new(DedupExchange::new()),
            forward: Forward::new(vec![manual].into()),
            feed,
            calls,
            dropped,
        }
    }

    fn result_for(operation: &Operation, n: u32) -> OperationResult {
        OperationResult::from_response(
            operation,
            GraphQLResponse {
                data: Some(json!({"n": n})),
                ..GraphQLResponse::default()
            },
        )
    }

    fn subscription() -> Operation {
        Operation::new(
            OperationKind::Subscription,
            GraphQLRequest::new("subscription NewUser { newUser { id name } }"),
            OperationContext::default(),
        )
    }

    async fn next(stream: &mut ResultStream) -> OperationResult {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn identical_queries_share_one_execution() {
        let (answer, calls) = Answer::new(json!({"ping": {"status": true}}));
        let dedup = DedupExchange::new();
        let forward = Forward::new(vec![answer].into());
        let op = query("query Ping { ping { status } }");

        let a = dedup.run(op.clone(), forward.clone());
        let b = dedup.run(op.clone(), forward.clone());
        let (a, b) = tokio::join!(
            a.collect::<Vec<_>>(),
            b.collect::<Vec<_>>()
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].data, b[0].data);
        assert_eq!(dedup.inflight(), 0);
    }

    #[tokio::test]
    async fn late_query_subscriber_replays_earlier_results() {
        let s = manual_setup();
        let op = query("query Ping { ping { status } }");

        let mut first = s.dedup.run(op.clone(), s.forward.clone());
        s.feed.send(result_for(&op, 1)).unwrap();
        assert_eq!(next(&mut first).await.data, Some(json!({"n": 1})));

        let mut late = s.dedup.run(op.clone(), s.forward.clone());
        assert_eq!(next(&mut late).await.data, Some(json!({"n": 1})));

        s.feed.send(result_for(&op, 2)).unwrap();
        assert_eq!(next(&mut first).await.data, Some(json!({"n": 2})));
        assert_eq!(next(&mut late).await.data, Some(json!({"n": 2})));
        assert_eq!(s.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_subscription_subscriber_sees_only_live_results() {
        let s = manual_setup();
        let op = subscription();

        let mut first = s.dedup.run(op.clone(), s.forward.clone());
        s.feed.send(result_for(&op, 1)).unwrap();
        assert_eq!(next(&mut first).await.data, Some(json!({"n": 1})));

        let mut late = s.dedup.run(op.clone(), s.forward.clone());
        s.feed.send(result_for(&op, 2)).unwrap();
        assert_eq!(next(&mut late).await.data, Some(json!({"n": 2})));
        assert_eq!(next(&mut first).await.data, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn upstream_is_cancelled_when_last_subscriber_leaves() {
        let s = manual_setup();
        let op = subscription();

        let mut a = s.dedup.run(op.clone(), s.forward.clone());
        let b = s.dedup.run(op.clone(), s.forward.clone());
        s.feed.send(result_for(&op, 1)).unwrap();
        let _ = next(&mut a).await;

        drop(b);
        assert_eq!(s.dedup.inflight(), 1);
        assert_eq!(s.dropped.load(Ordering::SeqCst), 0);

        drop(a);
        assert_eq!(s.dedup.inflight(), 0);
        tokio::time::timeout(Duration::from_secs(1), async {
            while s.dropped.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn results_are_readdressed_to_each_subscriber() {
        let s = manual_setup();
        let op = query("query Ping { ping { status } }");
        let mut other = op.clone();
        other.context.url = "http://other/api".to_string();

        let mut a = s.dedup.run(op.clone(), s.forward.clone());
        let mut b = s.dedup.run(other, s.forward.clone());
        s.feed.send(result_for(&op, 1)).unwrap();

        assert_eq!(next(&mut a).await.operation.context.url, "");
        assert_eq!(next(&mut b).await.operation.context.url, "http://other/api");
    }

    #[tokio::test]
    async fn mutations_are_never_shared() {
        let (answer, calls) = Answer::new(json!({"ok": true}));
        let dedup = DedupExchange::new();
        let forward = Forward::new(vec![answer].into());
        let op = Operation::new(
            OperationKind::Mutation,
            GraphQLRequest::new("mutation Touch { touch }"),
            OperationContext::default(),
        );

        let (a, b) = tokio::join!(
            dedup.run(op.clone(), forward.clone()).collect::<Vec<_>>(),
            dedup.run(op, forward).collect::<Vec<_>>()
        );
        assert_eq!(a.len() + b.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finished_query_runs_again() {
        let (answer, calls) = Answer::new(json!({"a": 1}));
        let dedup = DedupExchange::new();
        let forward = Forward::new(vec![answer].into());
        let op = query("{ a }");

        let _ = dedup.run(op.clone(), forward.clone()).collect::<Vec<_>>().await;
        let _ = dedup.run(op, forward).collect::<Vec<_>>().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
