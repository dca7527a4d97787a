//! Phoenix v2 wire frames.
//!
//! Every frame is a JSON array `[join_ref, ref, topic, event, payload]`.
//! `join_ref` ties a push to the channel join it belongs to; `ref`
//! correlates a push with its `phx_reply`.

use serde_json::{Value, json};

use crate::error::TransportError;

/// Topic of socket-level messages (heartbeats).
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Event names used on the wire.
pub mod event {
    /// Join a channel.
    pub const JOIN: &str = "phx_join";
    /// Leave a channel.
    pub const LEAVE: &str = "phx_leave";
    /// Reply to a push carrying a `ref`.
    pub const REPLY: &str = "phx_reply";
    /// The channel crashed on the server.
    pub const ERROR: &str = "phx_error";
    /// The server closed the channel.
    pub const CLOSE: &str = "phx_close";
    /// Keep-alive on the `phoenix` topic.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Register a subscription document on the control channel.
    pub const DOC: &str = "doc";
    /// Drop a registered subscription on the control channel.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// A subscription result pushed on the subscription topic.
    pub const SUBSCRIPTION_DATA: &str = "subscription:data";
}

/// One frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Ref of the join this push belongs to.
    pub join_ref: Option<String>,
    /// Ref correlating a push with its reply.
    pub msg_ref: Option<String>,
    /// Channel topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
}

impl Message {
    /// Frame without refs.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// Set the push ref.
    #[must_use]
    pub fn with_ref(mut self, msg_ref: impl Into<String>) -> Self {
        self.msg_ref = Some(msg_ref.into());
        self
    }

    /// Set the join ref.
    #[must_use]
    pub fn with_join_ref(mut self, join_ref: Option<String>) -> Self {
        self.join_ref = join_ref;
        self
    }

    /// Serialize to the v2 array form.
    pub fn encode(&self) -> String {
        json!([
            self.join_ref,
            self.msg_ref,
            self.topic,
            self.event,
            self.payload
        ])
        .to_string()
    }

    /// Parse a v2 array frame.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let (join_ref, msg_ref, topic, event, payload): (
            Option<String>,
            Option<String>,
            String,
            String,
            Value,
        ) = serde_json::from_str(text)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    /// Whether this is a `phx_reply`.
    pub fn is_reply(&self) -> bool {
        self.event == event::REPLY
    }
}

/// Decoded `phx_reply` payload: `{"status": "...", "response": {...}}`.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// `ok`, `error`, ...
    pub status: String,
    /// Reply body.
    pub response: Value,
}

impl Reply {
    /// Decode from a reply frame's payload.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            response: payload.get("response").cloned().unwrap_or_else(|| json!({})),
        }
    }

    /// Whether the push succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// `subscriptionId` from a `doc` acknowledgement.
    pub fn subscription_id(&self) -> Option<&str> {
        self.response
            .get("subscriptionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Convert a non-`ok` reply into an error for `event` on `topic`.
    pub fn into_result(self, topic: &str, event: &str) -> Result<Value, TransportError> {
        if self.is_ok() {
            Ok(self.response)
        } else {
            Err(TransportError::Rejected {
                topic: topic.to_string(),
                event: event.to_string(),
                response: self.response,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
