//! Durable stores: the export backlog and the pending remote-jobs queue.
//!
//! Both stores follow the same model: the file on disk is the source of
//! truth, every mutating call rewrites it atomically before returning and
//! readers always reload it. Nothing is cached between calls, so several
//! processes may use the same file one after the other.

use std::io;
use std::path::{Path, PathBuf};

pub mod backlog;
pub mod pending;
pub mod persist;

pub use backlog::{Backlog, BacklogEntry, FileBacklog, InMemoryBacklog};
pub use pending::{FilePendingJobsQueue, InMemoryPendingJobsQueue, PendingJobsQueue};

/// Persistence failure. Always fatal for the current invocation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt store {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("invalid store name {0:?} (expected [A-Za-z0-9._-]+)")]
    InvalidName(String),
}

impl StoreError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
