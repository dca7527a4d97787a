//! Settings types.
//!
//! All structs use `#[serde(default)]` so a partial settings file only needs
//! the keys it overrides.

pub mod api;
pub mod identity;
pub mod realtime;

pub use api::ApiSettings;
pub use identity::IdentitySettings;
pub use realtime::RealtimeSettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// GraphQL HTTP endpoint.
    pub api: ApiSettings,
    /// Absinthe socket endpoint and timeouts.
    pub realtime: RealtimeSettings,
    /// Identity provider credentials and endpoints.
    pub identity: IdentitySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Check values that would otherwise fail late at connect time.
    pub fn validate(&self) -> Result<()> {
        if !(self.api.url.starts_with("http://") || self.api.url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "api.url must be an http(s) URL, got {:?}",
                self.api.url
            )));
        }
        if !(self.realtime.url.starts_with("ws://") || self.realtime.url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.url must be a ws(s) URL, got {:?}",
                self.realtime.url
            )));
        }
        let timeouts = [
            ("realtime.joinTimeoutMs", self.realtime.join_timeout_ms),
            ("realtime.registrationTimeoutMs", self.realtime.registration_timeout_ms),
            ("realtime.heartbeatIntervalMs", self.realtime.heartbeat_interval_ms),
            ("identity.requestTimeoutMs", self.identity.request_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::InvalidValue(format!("{name} must be positive")));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
