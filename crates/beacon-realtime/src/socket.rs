//! Phoenix socket: one WebSocket connection driven by a single task.
//!
//! The connection task owns the stream and selects over three sources:
//! commands from handles, frames from the server and the heartbeat timer.
//! Replies are matched to pushes by `ref`; every other frame is routed to
//! the channel registered for its topic. A heartbeat that is still
//! unanswered when the next one is due closes the socket. Pushes whose reply
//! has not arrived within [`SocketOptions::reply_ttl`] are forgotten on the
//! next heartbeat tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::TransportError;
use crate::message::{Message, PHOENIX_TOPIC, Reply, event};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback run by the connection task when a push's reply arrives, before
/// any later frame is processed.
pub type ReplyHook = Box<dyn FnOnce(&Reply) + Send>;

/// Topic → sender of frames for that topic.
pub(crate) type RouteTable = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Connection tuning.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Bound on opening the WebSocket.
    pub connect_timeout: Duration,
    /// How long a push waits for its reply before it is evicted. Its hook
    /// never runs and its reply receiver fails.
    pub reply_ttl: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reply_ttl: Duration::from_secs(60),
        }
    }
}

/// Connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    /// Connected.
    Open,
    /// Closed by either side. Terminal.
    Closed,
}

enum Command {
    Push {
        message: Message,
        reply_tx: Option<oneshot::Sender<Reply>>,
        hook: Option<ReplyHook>,
    },
    Close,
}

struct PendingReply {
    reply_tx: Option<oneshot::Sender<Reply>>,
    hook: Option<ReplyHook>,
    deadline: Instant,
}

/// Sending half shared by the socket handle and reply hooks.
#[derive(Clone)]
pub(crate) struct Outbox {
    cmd_tx: mpsc::UnboundedSender<Command>,
    refs: Arc<AtomicU64>,
}

impl Outbox {
    pub(crate) fn next_ref(&self) -> String {
        next_ref(&self.refs)
    }

    /// Queue `message`, assigning a ref if it has none. Returns the ref.
    pub(crate) fn push(
        &self,
        mut message: Message,
        reply_tx: Option<oneshot::Sender<Reply>>,
        hook: Option<ReplyHook>,
    ) -> Result<String, TransportError> {
        let msg_ref = message
            .msg_ref
            .get_or_insert_with(|| next_ref(&self.refs))
            .clone();
        self.cmd_tx
            .send(Command::Push {
                message,
                reply_tx,
                hook,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(msg_ref)
    }
}

fn next_ref(refs: &AtomicU64) -> String {
    (refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
}

struct SocketInner {
    url: String,
    outbox: Outbox,
    routes: RouteTable,
    state_rx: watch::Receiver<SocketState>,
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let _ = self.outbox.cmd_tx.send(Command::Close);
    }
}

/// Handle to a Phoenix socket. Cheap to clone; the connection closes when
/// the last handle is dropped or [`Socket::disconnect`] is called.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl Socket {
    /// Open the WebSocket at `url` and start the connection task.
    #[tracing::instrument(skip(options))]
    pub async fn connect(url: &str, options: SocketOptions) -> Result<Self, TransportError> {
        let timeout_ms = u64::try_from(options.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let (ws, _) = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms,
                context: format!("connect {url}"),
            })?
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!("socket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SocketState::Open);
        let routes: RouteTable = Arc::default();
        let refs = Arc::new(AtomicU64::new(0));

        let _handle = tokio::spawn(connection_loop(
            ws,
            cmd_rx,
            Arc::clone(&routes),
            Arc::clone(&refs),
            state_tx,
            options,
        ));

        Ok(Self {
            inner: Arc::new(SocketInner {
                url: url.to_string(),
                outbox: Outbox { cmd_tx, refs },
                routes,
                state_rx,
            }),
        })
    }

    /// URL the socket connected to.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current state.
    pub fn state(&self) -> SocketState {
        *self.inner.state_rx.borrow()
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Resolve once the socket is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.state_rx.clone();
        let _ = rx.wait_for(|s| *s == SocketState::Closed).await;
    }

    /// Create a channel for `topic`, registering its route.
    ///
    /// Fails with [`TransportError::DuplicateChannel`] if the topic already
    /// has a channel on this socket.
    pub fn channel(&self, topic: &str) -> Result<Channel, TransportError> {
        let events = self.attach_route(topic)?;
        Ok(Channel::new(self.clone(), topic, events))
    }

    /// Push a frame and return a receiver for its reply.
    pub fn push(&self, message: Message) -> Result<oneshot::Receiver<Reply>, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.outbox.push(message, Some(tx), None)?;
        Ok(rx)
    }

    /// Push a frame; `hook` runs inside the connection task when the reply
    /// arrives, before the reply is delivered on the returned receiver.
    pub fn push_with_hook(
        &self,
        message: Message,
        hook: ReplyHook,
    ) -> Result<oneshot::Receiver<Reply>, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.outbox.push(message, Some(tx), Some(hook))?;
        Ok(rx)
    }

    /// Push a frame without waiting for a reply.
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        let _ = self.inner.outbox.push(message, None, None)?;
        Ok(())
    }

    /// Close the connection. Pending replies fail with
    /// [`TransportError::Closed`] and every channel's event stream ends.
    pub fn disconnect(&self) {
        if self.is_open() {
            debug!(url = %self.inner.url, "disconnecting socket");
        }
        let _ = self.inner.outbox.cmd_tx.send(Command::Close);
    }

    /// Number of topics with a registered route.
    pub fn route_count(&self) -> usize {
        self.inner.routes.lock().len()
    }

    pub(crate) fn next_ref(&self) -> String {
        self.inner.outbox.next_ref()
    }

    pub(crate) fn outbox(&self) -> Outbox {
        self.inner.outbox.clone()
    }

    pub(crate) fn routes(&self) -> RouteTable {
        Arc::clone(&self.inner.routes)
    }

    pub(crate) fn attach_route(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<Message>, TransportError> {
        self.ensure_open()?;
        let mut routes = self.inner.routes.lock();
        if routes.contains_key(topic) {
            return Err(TransportError::DuplicateChannel(topic.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = routes.insert(topic.to_string(), tx);
        Ok(rx)
    }

    pub(crate) fn detach_route(&self, topic: &str) {
        let _ = self.inner.routes.lock().remove(topic);
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

async fn connection_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    routes: RouteTable,
    refs: Arc<AtomicU64>,
    state_tx: watch::Sender<SocketState>,
    options: SocketOptions,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<String, PendingReply> = HashMap::new();
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + options.heartbeat_interval,
        options.heartbeat_interval,
    );
    let mut heartbeat_ref: Option<String> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(Command::Push { message, reply_tx, hook }) = cmd else {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Some(msg_ref) = &message.msg_ref {
                    if reply_tx.is_some() || hook.is_some() {
                        let deadline = Instant::now() + options.reply_ttl;
                        let _ = pending.insert(
                            msg_ref.clone(),
                            PendingReply { reply_tx, hook, deadline },
                        );
                    }
                }
                trace!(topic = %message.topic, event = %message.event, "push");
                if ws_tx.send(WsMessage::Text(message.encode().into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                let text = match frame {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };
                match Message::decode(&text) {
                    Ok(message) => dispatch(message, &mut pending, &routes, &mut heartbeat_ref),
                    Err(e) => warn!("dropping malformed frame: {e}"),
                }
            }
            _ = heartbeat.tick() => {
                if heartbeat_ref.is_some() {
                    warn!("heartbeat timeout, closing socket");
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                let evicted = evict_expired(&mut pending, Instant::now());
                if evicted > 0 {
                    debug!(evicted, "dropped pushes that were never answered");
                }
                let msg_ref = next_ref(&refs);
                let message = Message::new(PHOENIX_TOPIC, event::HEARTBEAT, json!({}))
                    .with_ref(msg_ref.clone());
                heartbeat_ref = Some(msg_ref);
                if ws_tx.send(WsMessage::Text(message.encode().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = state_tx.send_replace(SocketState::Closed);
    // Dropping the senders ends every channel's event stream.
    routes.lock().clear();
    debug!(pending = pending.len(), "socket closed");
}

/// Forget pushes whose deadline has passed. Returns how many were dropped.
fn evict_expired(pending: &mut HashMap<String, PendingReply>, now: Instant) -> usize {
    let before = pending.len();
    pending.retain(|_, waiter| waiter.deadline > now);
    before - pending.len()
}

fn dispatch(
    message: Message,
    pending: &mut HashMap<String, PendingReply>,
    routes: &RouteTable,
    heartbeat_ref: &mut Option<String>,
) {
    if message.is_reply() {
        if let Some(msg_ref) = message.msg_ref.as_deref() {
            if heartbeat_ref.as_deref() == Some(msg_ref) {
                *heartbeat_ref = None;
                return;
            }
            if let Some(waiter) = pending.remove(msg_ref) {
                let reply = Reply::from_payload(&message.payload);
                if let Some(hook) = waiter.hook {
                    hook(&reply);
                }
                if let Some(tx) = waiter.reply_tx {
                    let _ = tx.send(reply);
                }
                return;
            }
        }
    }

    let route = routes.lock().get(&message.topic).cloned();
    match route {
        Some(tx) => {
            let topic = message.topic.clone();
            if tx.send(message).is_err() {
                trace!(%topic, "channel receiver gone");
            }
        }
        None => trace!(topic = %message.topic, event = %message.event, "no route for frame"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn routes_with(topic: &str) -> (RouteTable, mpsc::UnboundedReceiver<Message>) {
        let routes: RouteTable = Arc::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = routes.lock().insert(topic.to_string(), tx);
        (routes, rx)
    }

    #[test]
    fn refs_are_monotonic() {
        let refs = AtomicU64::new(0);
        assert_eq!(next_ref(&refs), "1");
        assert_eq!(next_ref(&refs), "2");
    }

    #[test]
    fn reply_runs_hook_before_delivery() {
        let (routes, mut rx) = routes_with("sub:1");
        let (tx, mut reply_rx) = oneshot::channel();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_hook = Arc::clone(&ran);
        let mut pending = HashMap::new();
        let _ = pending.insert(
            "7".to_string(),
            PendingReply {
                reply_tx: Some(tx),
                hook: Some(Box::new(move |reply: &Reply| {
                    assert!(reply.is_ok());
                    ran_in_hook.store(true, Ordering::SeqCst);
                })),
                deadline: Instant::now() + Duration::from_secs(60),
            },
        );
        let mut heartbeat_ref = None;

        let reply = Message::new("ctl", event::REPLY, json!({"status": "ok", "response": {}}))
            .with_ref("7");
        dispatch(reply, &mut pending, &routes, &mut heartbeat_ref);

        assert!(ran.load(Ordering::SeqCst));
        assert!(reply_rx.try_recv().unwrap().is_ok());
        assert!(pending.is_empty());
        // Replies are not routed to channels.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn heartbeat_reply_clears_outstanding_ref() {
        let routes: RouteTable = Arc::default();
        let mut pending = HashMap::new();
        let mut heartbeat_ref = Some("3".to_string());
        let reply = Message::new(PHOENIX_TOPIC, event::REPLY, json!({"status": "ok"})).with_ref("3");
        dispatch(reply, &mut pending, &routes, &mut heartbeat_ref);
        assert!(heartbeat_ref.is_none());
    }

    #[test]
    fn pushes_are_routed_by_topic() {
        let (routes, mut rx) = routes_with("sub:1");
        let mut pending = HashMap::new();
        let mut heartbeat_ref = None;

        for topic in ["sub:1", "sub:2"] {
            let data = Message::new(topic, event::SUBSCRIPTION_DATA, json!({"result": {}}));
            dispatch(data, &mut pending, &routes, &mut heartbeat_ref);
        }

        assert_eq!(rx.try_recv().unwrap().topic, "sub:1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unmatched_reply_falls_through_to_route() {
        let (routes, mut rx) = routes_with("ctl");
        let mut pending = HashMap::new();
        let mut heartbeat_ref = None;
        let reply = Message::new("ctl", event::REPLY, json!({"status": "ok"})).with_ref("99");
        dispatch(reply, &mut pending, &routes, &mut heartbeat_ref);
        assert!(rx.try_recv().unwrap().is_reply());
    }

    #[test]
    fn expired_pushes_are_evicted_without_running_hooks() {
        let start = Instant::now();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_hook = Arc::clone(&ran);
        let (stale_tx, mut stale_rx) = oneshot::channel();
        let (fresh_tx, _fresh_rx) = oneshot::channel();
        let mut pending = HashMap::new();
        let _ = pending.insert(
            "1".to_string(),
            PendingReply {
                reply_tx: Some(stale_tx),
                hook: Some(Box::new(move |_: &Reply| ran_in_hook.store(true, Ordering::SeqCst))),
                deadline: start + Duration::from_millis(100),
            },
        );
        let _ = pending.insert(
            "2".to_string(),
            PendingReply {
                reply_tx: Some(fresh_tx),
                hook: None,
                deadline: start + Duration::from_secs(60),
            },
        );

        assert_eq!(evict_expired(&mut pending, start + Duration::from_secs(1)), 1);
        assert!(pending.contains_key("2"));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(stale_rx.try_recv().is_err());

        // A reply for the evicted ref is no longer correlated.
        let routes: RouteTable = Arc::default();
        let mut heartbeat_ref = None;
        let late = Message::new("ctl", event::REPLY, json!({"status": "ok"})).with_ref("1");
        dispatch(late, &mut pending, &routes, &mut heartbeat_ref);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pending.len(), 1);
    }
}
