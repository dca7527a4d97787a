//! # beacon-settings
//!
//! Configuration for the Beacon client, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **User file**: `~/.beacon/settings.json` or `$BEACON_SETTINGS`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: the `VUE_APP_*` endpoint and identity
//!    provider variables plus `BEACON_*` tuning knobs

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, beacon_home, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
