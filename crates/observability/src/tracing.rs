//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::logging::LogOptions;

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` wins over the level derived from `options`. Logs go to stderr
/// so command output on stdout stays machine readable.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(options: &LogOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
