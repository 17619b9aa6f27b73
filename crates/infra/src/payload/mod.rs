//! Payload building: turning local data into upload bodies.

use std::io;
use std::path::{Path, PathBuf};

use crate::portal::UploadBody;

pub mod devices;
pub mod series;
pub mod source;
pub mod vardefs;

pub use devices::DeviceNetworkConfig;
pub use series::{EventsJobParams, SeriesPayloadBuilder};
pub use source::{
    EventSource, EventValue, InMemoryEventSource, JsonlEventSource, SourceError, TimedEvent,
};
pub use vardefs::VariableDefinitionsBuilder;

/// Version written in the header of every generated document.
pub const FORMAT_VERSION: u32 = 1;

/// Timestamp format used in headers and series points.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Payload construction failure. Never retried within a job.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
    #[error("invalid variable name {0:?}")]
    InvalidVariableName(String),
    #[error("duplicated variable: {0}")]
    DuplicateVariable(String),
    #[error("invalid devices configuration: {0}")]
    Devices(String),
}

impl BuildError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether building again from the same input is bound to fail.
    ///
    /// I/O failures depend on the host (full disk, permissions) and may
    /// clear up by the next run.
    pub fn is_permanent(&self) -> bool {
        match self {
            BuildError::Source(SourceError::Parse { .. })
            | BuildError::InvalidVariableName(_)
            | BuildError::DuplicateVariable(_)
            | BuildError::Devices(_) => true,
            BuildError::Source(SourceError::Io { .. })
            | BuildError::Io { .. }
            | BuildError::Archive { .. } => false,
        }
    }
}

/// Builds the payload of one export job.
pub trait PayloadBuilder: Send + Sync {
    /// Job parameters stored in the backlog.
    type Params;

    /// `Ok(None)` when there is nothing to export.
    fn build(&self, params: &Self::Params, staging_dir: &Path)
    -> Result<Option<Payload>, BuildError>;
}

/// A built payload, ready to upload.
#[derive(Debug)]
pub struct Payload {
    /// Number of exported records.
    pub record_count: usize,
    pub body: UploadBody,
    /// Temporary file backing `body`, deleted when the payload is dropped.
    pub artifact: Option<TempArtifact>,
}

/// A temporary file owned by a job.
///
/// The file is deleted when the guard is dropped, whichever way the job
/// ends (including unwinding), unless retention was requested.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    retain: bool,
}

impl TempArtifact {
    pub fn new(path: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            path: path.into(),
            retain,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_retained(&self) -> bool {
        self.retain
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.retain {
            tracing::warn!(path = %self.path.display(), "debug mode: temporary file not deleted");
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "temporary file deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "cannot delete temporary file"
                )
            }
        }
    }
}
