//! Process-wide logging for the supervising process.
//!
//! Stdout carries exactly one response line, so every log event goes to
//! stderr. Workers install their own per-job subscriber instead.

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber (`RUST_LOG` aware, default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
