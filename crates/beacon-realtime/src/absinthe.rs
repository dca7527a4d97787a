//! Absinthe subscriptions over the Phoenix socket.
//!
//! Registration protocol:
//! 1. Wait until the control channel is joined (bounded by the
//!    registration timeout).
//! 2. Push `doc` with `{query, variables, operationName}` on the control
//!    channel.
//! 3. When the `ok` reply arrives, read `subscriptionId` and attach a route
//!    for that topic. This happens inside the connection task, before any
//!    later frame is read, so no early `subscription:data` is missed.
//! 4. Forward each `subscription:data` payload's `result`.
//!
//! Dropping the result stream releases the subscription: the subscription
//! channel is left once and `unsubscribe` is pushed on the control channel.
//! A stream dropped (or timed out) before its acknowledgement arrives
//! leaves nothing behind: a late acknowledgement is answered with
//! `unsubscribe` and no route is attached.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    GraphQLRequest, GraphQLResponse, OperationError, SubscriptionForwarder, SubscriptionStream,
};
use beacon_settings::RealtimeSettings;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::Channel;
use crate::error::TransportError;
use crate::message::{Message, Reply, event};
use crate::socket::{Outbox, ReplyHook, RouteTable, Socket, SocketOptions};

/// Endpoint and timeouts for [`AbsintheTransport`].
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Full WebSocket URL, e.g. `ws://localhost:4000/socket/websocket?vsn=2.0.0`.
    pub socket_url: String,
    /// Control channel topic.
    pub control_topic: String,
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Bound on opening the WebSocket.
    pub connect_timeout: Duration,
    /// Bound on the control channel join.
    pub join_timeout: Duration,
    /// Bound on readiness plus `doc` acknowledgement for one registration.
    pub registration_timeout: Duration,
}

impl TransportConfig {
    /// Config for `socket_url` with default topic and timeouts.
    pub fn new(socket_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            ..Self::from(&RealtimeSettings::default())
        }
    }
}

impl From<&RealtimeSettings> for TransportConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            socket_url: settings.socket_url(),
            control_topic: settings.control_topic.clone(),
            heartbeat_interval: settings.heartbeat_interval(),
            connect_timeout: settings.connect_timeout(),
            join_timeout: settings.join_timeout(),
            registration_timeout: settings.registration_timeout(),
        }
    }
}

/// Readiness of the control channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Join in progress; registrations wait.
    Joining,
    /// Joined; registrations proceed.
    Ready,
    /// The join failed or the server closed the control channel.
    Failed(String),
    /// The socket is closed.
    Closed,
}

/// Subscription transport over one socket and its control channel.
///
/// Cheap to clone. The socket closes on [`AbsintheTransport::disconnect`]
/// or when the last clone and every result stream are dropped.
#[derive(Clone)]
pub struct AbsintheTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    socket: Socket,
    control: Arc<Channel>,
    config: TransportConfig,
    ready_tx: Arc<watch::Sender<ReadyState>>,
    ready_rx: watch::Receiver<ReadyState>,
    supervisor: JoinHandle<()>,
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.socket.disconnect();
    }
}

impl AbsintheTransport {
    /// Open the socket and start joining the control channel.
    ///
    /// Returns once the socket is open; the join completes in the
    /// background (see [`AbsintheTransport::ready_state`]).
    #[tracing::instrument(skip_all, fields(url = %config.socket_url))]
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let socket = Socket::connect(
            &config.socket_url,
            SocketOptions {
                heartbeat_interval: config.heartbeat_interval,
                connect_timeout: config.connect_timeout,
                ..SocketOptions::default()
            },
        )
        .await?;
        let control = Arc::new(socket.channel(&config.control_topic)?);
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Joining);
        let ready_tx = Arc::new(ready_tx);

        let supervisor = tokio::spawn(supervise_control(
            socket.clone(),
            Arc::clone(&control),
            Arc::clone(&ready_tx),
            config.join_timeout,
        ));

        Ok(Self {
            inner: Arc::new(TransportInner {
                socket,
                control,
                config,
                ready_tx,
                ready_rx,
                supervisor,
            }),
        })
    }

    /// Current readiness.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_rx.borrow().clone()
    }

    /// Wait until the control channel join settles, up to the join timeout.
    pub async fn wait_ready(&self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.inner.config.join_timeout;
        self.inner.wait_ready_until(deadline).await
    }

    /// The underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.inner.socket
    }

    /// Leave the control channel and close the socket. Active result
    /// streams end with [`TransportError::Closed`].
    pub async fn disconnect(&self) {
        info!(url = %self.inner.config.socket_url, "disconnecting realtime transport");
        self.inner.control.leave_detached();
        self.inner.socket.disconnect();
        let _ = self.inner.ready_tx.send_replace(ReadyState::Closed);
        self.inner.socket.closed().await;
    }

    /// Register `request` and stream its results.
    ///
    /// The stream is lazy: nothing is sent until it is first polled.
    pub fn subscribe(
        &self,
        request: GraphQLRequest,
    ) -> BoxStream<'static, Result<GraphQLResponse, TransportError>> {
        let inner = Arc::clone(&self.inner);
        async_stream::stream! {
            let (lease, mut events) = match inner.register(&request).await {
                Ok(registered) => registered,
                Err(e) => {
                    warn!(operation = ?request.operation_name, "subscription registration failed: {e}");
                    yield Err(e);
                    return;
                }
            };

            while let Some(message) = events.recv().await {
                match message.event.as_str() {
                    event::SUBSCRIPTION_DATA => yield parse_result(message.payload),
                    event::CLOSE => {
                        debug!(id = %lease.id, "subscription channel closed by server");
                        break;
                    }
                    event::ERROR => {
                        yield Err(TransportError::Rejected {
                            topic: lease.id.clone(),
                            event: event::ERROR.to_string(),
                            response: message.payload,
                        });
                        break;
                    }
                    other => trace!(id = %lease.id, event = other, "ignoring subscription frame"),
                }
            }

            if !inner.socket.is_open() {
                yield Err(TransportError::Closed);
            }
        }
        .boxed()
    }
}

impl SubscriptionForwarder for AbsintheTransport {
    fn forward_subscription(&self, request: GraphQLRequest) -> SubscriptionStream {
        self.subscribe(request)
            .map(|item| item.map_err(OperationError::from))
            .boxed()
    }
}

impl std::fmt::Debug for AbsintheTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbsintheTransport")
            .field("socket", &self.inner.socket)
            .field("ready", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl TransportInner {
    async fn wait_ready_until(&self, deadline: Instant) -> Result<(), TransportError> {
        let mut rx = self.ready_rx.clone();
        let state = match tokio::time::timeout_at(
            deadline,
            rx.wait_for(|s| *s != ReadyState::Joining),
        )
        .await
        {
            Err(_) => {
                return Err(TransportError::NotReady(
                    "control channel join still pending".to_string(),
                ));
            }
            Ok(Err(_)) => return Err(TransportError::Closed),
            Ok(Ok(state)) => state.clone(),
        };
        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed(reason) => Err(TransportError::NotReady(reason)),
            ReadyState::Closed => Err(TransportError::Closed),
            ReadyState::Joining => Err(TransportError::NotReady("joining".to_string())),
        }
    }

    async fn register(
        &self,
        request: &GraphQLRequest,
    ) -> Result<(SubscriptionLease, mpsc::UnboundedReceiver<Message>), TransportError> {
        let timeout = self.config.registration_timeout;
        let deadline = Instant::now() + timeout;
        self.wait_ready_until(deadline).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = PendingRegistration {
            slot: Arc::new(Mutex::new(Registration::Pending(events_tx))),
            socket: self.socket.clone(),
            control: Arc::clone(&self.control),
        };
        let hook = registration_hook(
            Arc::clone(&pending.slot),
            self.socket.routes(),
            self.socket.outbox(),
            self.control.topic().to_string(),
            self.control.join_ref(),
        );

        let reply_rx = self
            .control
            .push_with_hook(event::DOC, serde_json::to_value(request)?, hook)?;
        let waited = tokio::time::timeout_at(deadline, reply_rx).await;

        match pending.take() {
            Registration::Attached(id) => {
                info!(%id, operation = ?request.operation_name, "subscription registered");
                let lease = SubscriptionLease::new(&self.socket, &self.control, id);
                Ok((lease, events_rx))
            }
            Registration::Rejected(reply) => Err(
                match reply.into_result(self.control.topic(), event::DOC) {
                    Ok(_) => TransportError::MissingSubscriptionId,
                    Err(e) => e,
                },
            ),
            Registration::Duplicate(id) => Err(TransportError::DuplicateChannel(id)),
            Registration::Pending(_) | Registration::Abandoned => Err(match waited {
                Err(_) => TransportError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    context: "subscription registration".to_string(),
                },
                Ok(Err(_)) => TransportError::Closed,
                Ok(Ok(_)) => TransportError::MissingSubscriptionId,
            }),
        }
    }
}

/// Keep the control channel's readiness current: join, then watch for the
/// server closing the channel or the socket going away.
async fn supervise_control(
    socket: Socket,
    control: Arc<Channel>,
    ready_tx: Arc<watch::Sender<ReadyState>>,
    join_timeout: Duration,
) {
    let Some(mut events) = control.events() else {
        let _ = ready_tx.send_replace(ReadyState::Failed("control events taken".to_string()));
        return;
    };

    match control.join(json!({}), join_timeout).await {
        Ok(_) => {
            info!(topic = %control.topic(), "control channel joined");
            let _ = ready_tx.send_replace(ReadyState::Ready);
        }
        Err(e) => {
            warn!(topic = %control.topic(), "control channel join failed: {e}");
            let _ = ready_tx.send_replace(ReadyState::Failed(e.to_string()));
            return;
        }
    }

    loop {
        tokio::select! {
            () = socket.closed() => {
                let _ = ready_tx.send_replace(ReadyState::Closed);
                break;
            }
            frame = events.recv() => match frame {
                Some(message) if message.event == event::CLOSE || message.event == event::ERROR => {
                    warn!(event = %message.event, "control channel closed by server");
                    let _ = ready_tx.send_replace(ReadyState::Failed(format!(
                        "control channel received {}",
                        message.event
                    )));
                    break;
                }
                Some(message) => trace!(event = %message.event, "control frame"),
                None => {
                    let _ = ready_tx.send_replace(ReadyState::Closed);
                    break;
                }
            }
        }
    }
}

/// Progress of one `doc` registration, shared between the registering
/// stream and the reply hook.
enum Registration {
    /// Waiting for the acknowledgement; holds the sender the route will use.
    Pending(mpsc::UnboundedSender<Message>),
    /// Acknowledged; route attached for this id.
    Attached(String),
    /// Acknowledged without `ok` status or without an id.
    Rejected(Reply),
    /// Acknowledged with an id that already has a route.
    Duplicate(String),
    /// The registering stream gave up.
    Abandoned,
}

/// Registration owned by the registering stream. If the stream goes away
/// after the route was attached but before it took the outcome, the
/// subscription is released here.
struct PendingRegistration {
    slot: Arc<Mutex<Registration>>,
    socket: Socket,
    control: Arc<Channel>,
}

impl PendingRegistration {
    fn take(&self) -> Registration {
        std::mem::replace(&mut *self.slot.lock(), Registration::Abandoned)
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        if let Registration::Attached(id) = self.take() {
            drop(SubscriptionLease::new(&self.socket, &self.control, id));
        }
    }
}

fn registration_hook(
    slot: Arc<Mutex<Registration>>,
    routes: RouteTable,
    outbox: Outbox,
    control_topic: String,
    control_join_ref: Option<String>,
) -> ReplyHook {
    Box::new(move |reply: &Reply| {
        let mut slot = slot.lock();
        let acknowledged_id = reply.subscription_id().filter(|_| reply.is_ok());
        *slot = match std::mem::replace(&mut *slot, Registration::Abandoned) {
            Registration::Pending(events_tx) => match acknowledged_id {
                Some(id) => {
                    let mut routes = routes.lock();
                    if routes.contains_key(id) {
                        Registration::Duplicate(id.to_string())
                    } else {
                        let _ = routes.insert(id.to_string(), events_tx);
                        Registration::Attached(id.to_string())
                    }
                }
                None => Registration::Rejected(reply.clone()),
            },
            Registration::Abandoned => {
                if let Some(id) = acknowledged_id {
                    debug!(%id, "late subscription acknowledgement, unsubscribing");
                    let message =
                        unsubscribe_message(&control_topic, control_join_ref.clone(), id);
                    if let Err(e) = outbox.push(message, None, None) {
                        debug!(%id, "unsubscribe not sent: {e}");
                    }
                }
                Registration::Abandoned
            }
            settled => settled,
        };
    })
}

fn unsubscribe_message(control_topic: &str, join_ref: Option<String>, id: &str) -> Message {
    Message::new(control_topic, event::UNSUBSCRIBE, json!({"subscriptionId": id}))
        .with_join_ref(join_ref)
}

/// An acknowledged subscription. Dropping it leaves the subscription
/// channel and pushes `unsubscribe` on the control channel.
struct SubscriptionLease {
    id: String,
    channel: Channel,
    control: Arc<Channel>,
}

impl SubscriptionLease {
    fn new(socket: &Socket, control: &Arc<Channel>, id: String) -> Self {
        Self {
            channel: Channel::attached(socket.clone(), &id),
            id,
            control: Arc::clone(control),
        }
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        self.channel.leave_detached();
        if let Err(e) = self
            .control
            .push_detached(event::UNSUBSCRIBE, json!({"subscriptionId": self.id}))
        {
            debug!(id = %self.id, "unsubscribe not sent: {e}");
        }
        debug!(id = %self.id, "subscription released");
    }
}

fn parse_result(mut payload: Value) -> Result<GraphQLResponse, TransportError> {
    let result = payload
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn config_from_settings() {
        let settings = RealtimeSettings {
            url: "wss://rt.example.com".to_string(),
            registration_timeout_ms: 2500,
            ..RealtimeSettings::default()
        };
        let config = TransportConfig::from(&settings);
        assert_eq!(
            config.socket_url,
            "wss://rt.example.com/socket/websocket?vsn=2.0.0"
        );
        assert_eq!(config.control_topic, "__absinthe__:control");
        assert_eq!(config.registration_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn config_new_keeps_defaults() {
        let config = TransportConfig::new("ws://127.0.0.1:1/socket/websocket");
        assert_eq!(config.socket_url, "ws://127.0.0.1:1/socket/websocket");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn parse_result_extracts_payload_result() {
        let response = parse_result(json!({
            "result": {"data": {"newUser": {"id": "1", "name": "Ada"}}},
            "subscriptionId": "sub:1"
        }))
        .unwrap();
        assert_eq!(response.data.unwrap()["newUser"]["name"], "Ada");
    }

    #[test]
    fn parse_result_without_result_is_an_error() {
        assert_matches!(parse_result(json!({})), Err(TransportError::Json(_)));
    }

    #[test]
    fn unsubscribe_frame_shape() {
        let msg = unsubscribe_message("__absinthe__:control", Some("1".to_string()), "sub:1");
        assert_eq!(
            msg.encode(),
            r#"["1",null,"__absinthe__:control","unsubscribe",{"subscriptionId":"sub:1"}]"#
        );
    }
}
