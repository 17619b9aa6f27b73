//! One-shot export of the variable definitions.
//!
//! Run when the device network changes, not on a schedule, so there is no
//! backlog: a failed export is reported and has to be run again by hand.

use dwh_core::{ErrorCode, JobId, RetryPolicy};

use super::JobContext;
use super::job::{ExportJob, JobError};
use super::process::ProcessError;
use crate::payload::{DeviceNetworkConfig, VariableDefinitionsBuilder};
use crate::portal::UploadTarget;

pub struct ConfigurationExportProcess<'a> {
    builder: &'a VariableDefinitionsBuilder,
    context: JobContext<'a>,
    policy: RetryPolicy,
}

impl<'a> ConfigurationExportProcess<'a> {
    pub fn new(
        builder: &'a VariableDefinitionsBuilder,
        context: JobContext<'a>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            builder,
            context,
            policy,
        }
    }

    /// Build and upload the definitions of `network`.
    ///
    /// Returns `Success`, `BuildError` or `TransportError`. Only a failure of
    /// the pending queue is an `Err`.
    pub fn run(&self, network: &DeviceNetworkConfig) -> Result<ErrorCode, ProcessError> {
        tracing::info!("starting configuration export");
        let job = ExportJob::new(
            JobId::new(),
            network,
            self.builder,
            UploadTarget::VariableDefinitions,
            self.context,
        );

        let status = match job.run(&self.policy) {
            Ok(report) => {
                tracing::info!(variables = report.record_count, "export process successful");
                ErrorCode::Success
            }
            Err(JobError::Persistence(e)) => return Err(e.into()),
            Err(e) => {
                tracing::error!(error = %e, "export process failed");
                e.code()
            }
        };
        Ok(status)
    }
}
