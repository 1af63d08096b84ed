// packages/engine/src/observability.rs
//! Tracing initialization
//!
//! The parent process logs to stdout; worker children must log to stderr
//! because their stdout carries the result/status protocol. `RUST_LOG`
//! overrides the configured level in both cases.

use tracing_subscriber::EnvFilter;

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()))
}

/// Install the subscriber for the engine (parent) process.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .try_init();
}

/// Install the subscriber for a worker child process. Writes to stderr.
pub fn init_worker_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr)
        .try_init();
}
