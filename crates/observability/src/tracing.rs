//! Tracing/logging initialization.
//!
//! Both entry points honour `RUST_LOG` and fall back to [`DEFAULT_FILTER`].
//! The real-time layer logs stream and poll activity at `debug`, so
//! `RUST_LOG=bizdesk_realtime=debug` is the usual knob when chasing a
//! missing event.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs with timestamps. Safe to call multiple times.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact text logs with targets, for terminals and tests.
pub fn init_pretty() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .try_init();
}
