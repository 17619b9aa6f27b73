//! Tracing and logging (shared setup for every binary).

/// Initialize process-wide logging with default options.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&logging::LogOptions::default());
}

/// Initialize process-wide logging with explicit options.
pub fn init_with(options: &logging::LogOptions) {
    tracing::init(options);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Logging options exposed to command line front ends.
pub mod logging;
