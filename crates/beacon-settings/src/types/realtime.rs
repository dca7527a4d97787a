//! Absinthe socket settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Phoenix protocol version requested on connect.
pub const PHOENIX_VSN: &str = "2.0.0";

/// Socket endpoint, control topic and the timeouts bounding readiness and
/// subscription registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Base URL of the socket server (`VUE_APP_WS_URL`).
    pub url: String,
    /// Socket mount path under `url`.
    pub socket_path: String,
    /// Topic used to negotiate subscriptions.
    pub control_topic: String,
    /// Interval between heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Bound on opening the WebSocket.
    pub connect_timeout_ms: u64,
    /// Bound on the control channel join.
    pub join_timeout_ms: u64,
    /// Bound on a `doc` registration acknowledgement.
    pub registration_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:4000".to_string(),
            socket_path: "/socket".to_string(),
            control_topic: "__absinthe__:control".to_string(),
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            join_timeout_ms: 10_000,
            registration_timeout_ms: 10_000,
        }
    }
}

impl RealtimeSettings {
    /// WebSocket URL including the transport suffix and protocol version,
    /// e.g. `ws://localhost:4000/socket/websocket?vsn=2.0.0`.
    pub fn socket_url(&self) -> String {
        format!(
            "{}{}/websocket?vsn={PHOENIX_VSN}",
            self.url.trim_end_matches('/'),
            self.socket_path
        )
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Join timeout as a [`Duration`].
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Registration timeout as a [`Duration`].
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}
