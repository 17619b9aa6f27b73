//! Client side of the data-collection portal.
//!
//! Two calls are used: uploading a payload (which, when accepted, may yield a
//! remote job id) and querying the processing status of such a remote job.

use std::path::PathBuf;
use std::sync::Arc;

use dwh_core::RemoteJobId;

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpPortalClient;

/// Portal client abstraction.
pub trait PortalClient: Send + Sync {
    /// Send a payload. `Ok` means the portal accepted it (2xx).
    fn upload(&self, upload: &Upload<'_>) -> Result<UploadReceipt, PortalError>;

    /// Ask for the processing status of a previously accepted upload.
    fn job_status(&self, id: &RemoteJobId) -> Result<RemoteJobStatus, PortalError>;
}

impl<P> PortalClient for Arc<P>
where
    P: PortalClient + ?Sized,
{
    fn upload(&self, upload: &Upload<'_>) -> Result<UploadReceipt, PortalError> {
        (**self).upload(upload)
    }

    fn job_status(&self, id: &RemoteJobId) -> Result<RemoteJobStatus, PortalError> {
        (**self).job_status(id)
    }
}

/// Which upload endpoint a payload goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    /// Variable series archive.
    Series,
    /// Variable definitions document.
    VariableDefinitions,
}

impl UploadTarget {
    /// Name of the multipart form field carrying the payload.
    pub fn form_field(self) -> &'static str {
        match self {
            UploadTarget::Series => "zip",
            UploadTarget::VariableDefinitions => "metadata",
        }
    }
}

/// Upload payload content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadBody {
    /// A file on disk, sent as is.
    File(PathBuf),
    /// An in-memory document.
    Bytes { file_name: String, content: Vec<u8> },
}

#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub target: UploadTarget,
    pub body: &'a UploadBody,
}

/// What the portal said when accepting an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    pub message: Option<String>,
    /// Absent when the portal did not return a usable id.
    pub remote_job_id: Option<RemoteJobId>,
}

/// Processing status of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobStatus {
    Completed,
    InProgress { code: i64 },
    Failed {
        failure: RemoteFailure,
        /// Text supplied by the portal, if any.
        status: Option<String>,
    },
}

impl RemoteJobStatus {
    /// Classify a status reply: zero is done, negative is a final error and
    /// positive means still being processed.
    pub fn from_reply(code: i64, status: Option<String>) -> Self {
        match code {
            0 => RemoteJobStatus::Completed,
            c if c > 0 => RemoteJobStatus::InProgress { code: c },
            c => RemoteJobStatus::Failed {
                failure: RemoteFailure::from_code(c),
                status,
            },
        }
    }

    /// Whether the portal is done with the job, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteJobStatus::InProgress { .. })
    }
}

/// Final failure reported by the portal for a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailure {
    BadFileFormat,
    MissingVariableName,
    UnknownVariableName,
    DatabaseConnectionFailure,
    IncoherentData,
    InvalidData,
    Unknown(i64),
}

impl RemoteFailure {
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => RemoteFailure::BadFileFormat,
            -2 => RemoteFailure::MissingVariableName,
            -3 => RemoteFailure::UnknownVariableName,
            -4 => RemoteFailure::DatabaseConnectionFailure,
            -5 => RemoteFailure::IncoherentData,
            -6 => RemoteFailure::InvalidData,
            other => RemoteFailure::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            RemoteFailure::BadFileFormat => -1,
            RemoteFailure::MissingVariableName => -2,
            RemoteFailure::UnknownVariableName => -3,
            RemoteFailure::DatabaseConnectionFailure => -4,
            RemoteFailure::IncoherentData => -5,
            RemoteFailure::InvalidData => -6,
            RemoteFailure::Unknown(code) => code,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            RemoteFailure::BadFileFormat => "bad file format",
            RemoteFailure::MissingVariableName => "missing variable name",
            RemoteFailure::UnknownVariableName => "unknown variable name",
            RemoteFailure::DatabaseConnectionFailure => "database connection failure",
            RemoteFailure::IncoherentData => "incoherent data error",
            RemoteFailure::InvalidData => "invalid data",
            RemoteFailure::Unknown(_) => "unknown code",
        }
    }
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.text(), self.code())
    }
}

/// Portal call failure.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// The portal answered with a non-2xx status.
    #[error("server replied with {status} {reason} ({body})")]
    Http {
        status: u16,
        reason: String,
        body: String,
    },
    /// No usable answer (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// A 2xx answer that could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The payload could not be read locally.
    #[error("cannot read payload {path}: {source}")]
    Payload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PortalError {
    /// Failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortalError::Http { .. } | PortalError::Transport(_) | PortalError::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_classified_by_sign() {
        assert_eq!(RemoteJobStatus::from_reply(0, None), RemoteJobStatus::Completed);
        assert_eq!(
            RemoteJobStatus::from_reply(1, Some("in process".into())),
            RemoteJobStatus::InProgress { code: 1 }
        );
        assert_eq!(
            RemoteJobStatus::from_reply(-3, None),
            RemoteJobStatus::Failed {
                failure: RemoteFailure::UnknownVariableName,
                status: None
            }
        );
        assert!(RemoteJobStatus::from_reply(-42, None).is_terminal());
        assert!(!RemoteJobStatus::from_reply(7, None).is_terminal());
    }

    #[test]
    fn failure_codes_round_trip() {
        for code in -7..=-1 {
            assert_eq!(RemoteFailure::from_code(code).code(), code);
        }
        assert_eq!(RemoteFailure::from_code(-99), RemoteFailure::Unknown(-99));
        assert_eq!(
            RemoteFailure::IncoherentData.to_string(),
            "incoherent data error (-5)"
        );
    }

    #[test]
    fn local_payload_errors_are_not_retried() {
        let err = PortalError::Payload {
            path: PathBuf::from("/tmp/x.zip"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.is_retryable());
        assert!(PortalError::Transport("reset".into()).is_retryable());
    }
}
