/// How log lines are filtered and rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Lower the default level from `info` to `debug`.
    ///
    /// Ignored when `RUST_LOG` is set.
    pub verbose: bool,
    /// Emit one JSON object per line instead of human readable text.
    pub json: bool,
}

impl LogOptions {
    pub fn default_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
