// LinkedOut — Structured logging via tracing

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Log level is controlled by the `LINKEDOUT_LOG` env var (default: `info`).
/// Examples:
///   LINKEDOUT_LOG=debug
///   LINKEDOUT_LOG=linkedout::setup=trace,info
pub fn init() {
    let filter =
        EnvFilter::try_from_env("LINKEDOUT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Initialize logger for tests (does not panic if called multiple times).
/// Public rather than `#[cfg(test)]` so the integration tests under `tests/`
/// can call it too.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
