//! # Structured Logging
//!
//! The source logs through a single `LogModule(level, module, fmt, ...)`
//! call threaded through every component. This crate's equivalent is
//! `tracing`: each module logs through the ordinary `tracing::{debug,info,
//! warn,error}!` macros, and `init()` installs the one process-wide
//! subscriber, configured from [`crate::config::LogConfig`].

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Safe to call once per process;
/// a second call is a no-op (logged at `debug!`) rather than a panic, since
/// tests and examples may each try to initialize logging independently.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}
