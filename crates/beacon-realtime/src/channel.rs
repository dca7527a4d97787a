//! Channels: topics multiplexed over one socket.

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::TransportError;
use crate::message::{Message, Reply, event};
use crate::socket::{ReplyHook, Socket};

/// Lifecycle of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Route attached, no join sent.
    Idle,
    /// `phx_join` sent, reply pending.
    Joining,
    /// Joined.
    Joined,
    /// The join was rejected or timed out.
    Errored,
    /// Left. Terminal.
    Left,
}

/// A topic on a [`Socket`].
///
/// Frames for the topic (other than replies to this channel's pushes) are
/// delivered on the receiver returned by [`Channel::events`].
pub struct Channel {
    topic: String,
    socket: Socket,
    join_ref: Mutex<Option<String>>,
    state: Mutex<ChannelState>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl Channel {
    pub(crate) fn new(
        socket: Socket,
        topic: &str,
        events: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            socket,
            join_ref: Mutex::new(None),
            state: Mutex::new(ChannelState::Idle),
            events: Mutex::new(Some(events)),
        }
    }

    /// Channel whose route was attached elsewhere; frames are read from the
    /// receiver that route feeds.
    pub(crate) fn attached(socket: Socket, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            socket,
            join_ref: Mutex::new(None),
            state: Mutex::new(ChannelState::Idle),
            events: Mutex::new(None),
        }
    }

    /// Channel topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub(crate) fn join_ref(&self) -> Option<String> {
        self.join_ref.lock().clone()
    }

    /// Take the receiver of frames routed to this topic. Returns `None`
    /// after the first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.events.lock().take()
    }

    /// Join the channel and wait for the reply.
    #[tracing::instrument(skip(self, payload), fields(topic = %self.topic))]
    pub async fn join(&self, payload: Value, timeout: Duration) -> Result<Value, TransportError> {
        let join_ref = self.socket.next_ref();
        {
            let mut state = self.state.lock();
            if *state == ChannelState::Left {
                return Err(TransportError::Closed);
            }
            *state = ChannelState::Joining;
            *self.join_ref.lock() = Some(join_ref.clone());
        }

        let message = Message::new(&self.topic, event::JOIN, payload)
            .with_ref(join_ref.clone())
            .with_join_ref(Some(join_ref));
        let result = self.await_reply(self.socket.push(message)?, event::JOIN, timeout).await;

        let mut state = self.state.lock();
        if *state == ChannelState::Joining {
            *state = if result.is_ok() {
                ChannelState::Joined
            } else {
                ChannelState::Errored
            };
        }
        debug!(state = ?*state, "join finished");
        result
    }

    /// Push `event` and wait for the reply's `response`.
    pub async fn push(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let rx = self.socket.push(self.message(event, payload))?;
        self.await_reply(rx, event, timeout).await
    }

    /// Push `event`; `hook` runs in the connection task as soon as the
    /// reply arrives. See [`Socket::push_with_hook`].
    pub fn push_with_hook(
        &self,
        event: &str,
        payload: Value,
        hook: ReplyHook,
    ) -> Result<oneshot::Receiver<Reply>, TransportError> {
        self.socket.push_with_hook(self.message(event, payload), hook)
    }

    /// Push `event` without waiting for a reply.
    pub fn push_detached(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.socket.send(self.message(event, payload))
    }

    /// Leave the channel and wait for the server's acknowledgement.
    ///
    /// Only the first call sends `phx_leave`; later calls return `Ok(())`.
    pub async fn leave(&self, timeout: Duration) -> Result<(), TransportError> {
        let Some(message) = self.begin_leave() else {
            return Ok(());
        };
        let rx = self.socket.push(message)?;
        self.await_reply(rx, event::LEAVE, timeout).await.map(|_| ())
    }

    /// Leave without waiting. Safe to call from `Drop`.
    ///
    /// Only the first call (of this or [`Channel::leave`]) sends `phx_leave`.
    pub fn leave_detached(&self) {
        if let Some(message) = self.begin_leave() {
            if let Err(e) = self.socket.send(message) {
                debug!(topic = %self.topic, "leave not sent: {e}");
            }
        }
    }

    /// Flip to `Left` and detach the route. Returns the leave frame on the
    /// first call only.
    fn begin_leave(&self) -> Option<Message> {
        {
            let mut state = self.state.lock();
            if *state == ChannelState::Left {
                return None;
            }
            *state = ChannelState::Left;
        }
        self.socket.detach_route(&self.topic);
        debug!(topic = %self.topic, "leaving channel");
        Some(self.message(event::LEAVE, json!({})))
    }

    fn message(&self, event: &str, payload: Value) -> Message {
        Message::new(&self.topic, event, payload).with_join_ref(self.join_ref.lock().clone())
    }

    async fn await_reply(
        &self,
        rx: oneshot::Receiver<Reply>,
        event: &str,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let reply = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                context: format!("{event} on {}", self.topic),
            })?
            .map_err(|_| TransportError::Closed)?;
        reply.into_result(&self.topic, event)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
