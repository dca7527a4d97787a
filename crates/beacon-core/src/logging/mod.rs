//! `tracing` subscriber setup.
//!
//! Every crate logs through `tracing` macros; binaries call
//! [`init_subscriber`] (human-readable) or [`init_json_subscriber`] once at
//! startup. `RUST_LOG` takes precedence over the configured level.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global subscriber with compact stderr output.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails only when a global subscriber already exists
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with one JSON object per line on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
