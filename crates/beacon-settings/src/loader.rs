//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BeaconSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "BEACON_SETTINGS";

/// Resolve the settings file: `$BEACON_SETTINGS`, else `~/.beacon/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    beacon_home().join("settings.json")
}

/// The per-user data directory (`~/.beacon`).
pub fn beacon_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (the environment in production,
/// a map in tests).
///
/// Empty strings are ignored. Numeric values must parse and fall in range,
/// otherwise they are ignored with a warning.
pub fn apply_overrides(settings: &mut BeaconSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let millis = |name: &str| {
        let val = string(name)?;
        let parsed = parse_u64_range(&val, 1, 3_600_000);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid millisecond env var, ignoring");
        }
        parsed
    };

    // ── Endpoints ───────────────────────────────────────────────────
    if let Some(v) = string("VUE_APP_API_URL") {
        settings.api.url = v;
    }
    if let Some(v) = string("VUE_APP_WS_URL") {
        settings.realtime.url = v;
    }

    // ── Identity provider ───────────────────────────────────────────
    let identity = &mut settings.identity;
    for (name, field) in [
        ("VUE_APP_API_KEY", &mut identity.api_key),
        ("VUE_APP_AUTH_DOMAIN", &mut identity.auth_domain),
        ("VUE_APP_DATABASE_URL", &mut identity.database_url),
        ("VUE_APP_PROJECT_ID", &mut identity.project_id),
        ("VUE_APP_STORAGE_BUCKET", &mut identity.storage_bucket),
        ("VUE_APP_MESSAGING_SENDER_ID", &mut identity.messaging_sender_id),
        ("VUE_APP_APP_ID", &mut identity.app_id),
        ("VUE_APP_MEASUREMENT_ID", &mut identity.measurement_id),
    ] {
        if let Some(v) = string(name) {
            *field = v;
        }
    }
    if let Some(v) = string("BEACON_SESSION_PATH") {
        identity.session_path = Some(v);
    }

    // ── Realtime timeouts ───────────────────────────────────────────
    if let Some(v) = millis("BEACON_REGISTRATION_TIMEOUT_MS") {
        settings.realtime.registration_timeout_ms = v;
    }
    if let Some(v) = millis("BEACON_JOIN_TIMEOUT_MS") {
        settings.realtime.join_timeout_ms = v;
    }
    if let Some(v) = millis("BEACON_HEARTBEAT_INTERVAL_MS") {
        settings.realtime.heartbeat_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("BEACON_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => tracing::warn!(value = %v, "invalid BEACON_LOG_JSON, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
