//! Export flows.
//!
//! An [`ExportJob`] builds one payload and uploads it with bounded retries.
//! The [`ExportProcess`] drives jobs from a durable backlog so that a job is
//! only forgotten once it succeeded. The [`ConfigurationExportProcess`] is
//! the one-shot variant used for variable definitions.

use std::path::Path;

use crate::portal::PortalClient;
use crate::store::PendingJobsQueue;

pub mod configuration;
pub mod job;
pub mod process;
#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::BuildErrorPolicy;
pub use configuration::ConfigurationExportProcess;
pub use job::{ExportJob, ExportReport, JobError};
pub use process::{EVENTS_BACKLOG, ExportProcess, ProcessError};

/// Collaborators shared by every job of a run.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub portal: &'a dyn PortalClient,
    pub pending: &'a dyn PendingJobsQueue,
    pub staging_dir: &'a Path,
}
