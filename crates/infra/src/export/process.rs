//! Backlog-driven export process.
//!
//! One invocation records the job of the current cycle in the backlog, then
//! runs every job the backlog holds (leftovers from failed cycles included)
//! one after the other. Successful jobs leave the backlog, failed ones stay
//! for the next invocation.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};

use dwh_core::{ErrorCode, JobId, RetryPolicy};

use super::job::{ExportJob, JobError};
use super::{BuildErrorPolicy, JobContext};
use crate::payload::{EventsJobParams, PayloadBuilder};
use crate::portal::UploadTarget;
use crate::store::{Backlog, StoreError};

/// Backlog name of the events flow.
pub const EVENTS_BACKLOG: &str = "events";

/// Failure aborting a whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
    #[error("date offset {0} points outside the supported calendar")]
    DateOutOfRange(i64),
}

impl ProcessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProcessError::Store(_) => ErrorCode::UnexpectedError,
            ProcessError::DateOutOfRange(_) => ErrorCode::ConfigurationError,
        }
    }
}

pub struct ExportProcess<'a, B, L> {
    backlog: &'a L,
    builder: &'a B,
    context: JobContext<'a>,
    policy: RetryPolicy,
    on_build_error: BuildErrorPolicy,
    failed_jobs: BTreeMap<JobId, ErrorCode>,
}

impl<'a, B, L> ExportProcess<'a, B, L>
where
    B: PayloadBuilder,
    L: Backlog<Params = B::Params>,
{
    pub fn new(
        backlog: &'a L,
        builder: &'a B,
        context: JobContext<'a>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backlog,
            builder,
            context,
            policy,
            on_build_error: BuildErrorPolicy::default(),
            failed_jobs: BTreeMap::new(),
        }
    }

    pub fn with_build_error_policy(mut self, policy: BuildErrorPolicy) -> Self {
        self.on_build_error = policy;
        self
    }

    /// Jobs that failed during the last run, with their codes.
    pub fn failed_jobs(&self) -> &BTreeMap<JobId, ErrorCode> {
        &self.failed_jobs
    }

    /// Record a new job for `params`, then run the whole backlog.
    ///
    /// The new entry is durable before any job runs.
    pub fn run(&mut self, params: B::Params) -> Result<ErrorCode, ProcessError> {
        let leftovers = self.backlog.snapshot()?;
        if leftovers.is_empty() {
            tracing::info!(backlog = self.backlog.name(), "backlog is empty");
        } else {
            let ids: Vec<String> = leftovers.iter().map(|e| e.job_id.to_string()).collect();
            tracing::warn!(
                backlog = self.backlog.name(),
                jobs = %ids.join(" "),
                "backlog is not empty"
            );
        }

        let job_id = JobId::new();
        self.backlog.put(job_id, &params)?;
        tracing::debug!(backlog = self.backlog.name(), job_id = %job_id, "job recorded");

        self.drain()
    }

    /// Run every job currently in the backlog, without adding one.
    pub fn drain(&mut self) -> Result<ErrorCode, ProcessError> {
        self.failed_jobs.clear();

        for entry in self.backlog.snapshot()? {
            let job_id = entry.job_id;
            tracing::info!(job_id = %job_id, "activating job");

            let job = ExportJob::new(
                job_id,
                &entry.parameters,
                self.builder,
                UploadTarget::Series,
                self.context,
            );
            let policy = self.policy;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&policy)));

            match outcome {
                Ok(Ok(report)) => {
                    tracing::info!(
                        job_id = %job_id,
                        records = report.record_count,
                        "job successful"
                    );
                    self.backlog.remove(job_id)?;
                }
                Ok(Err(JobError::Persistence(e))) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %e,
                        "persistence failure, aborting run"
                    );
                    return Err(e.into());
                }
                Ok(Err(e)) => {
                    let code = e.code();
                    tracing::error!(job_id = %job_id, code = code.code(), error = %e, "job failed");
                    let permanent = matches!(&e, JobError::Build(b) if b.is_permanent());
                    if permanent && self.on_build_error == BuildErrorPolicy::Drop {
                        tracing::warn!(
                            job_id = %job_id,
                            "dropping job whose payload cannot be built"
                        );
                        self.backlog.remove(job_id)?;
                    }
                    self.failed_jobs.insert(job_id, code);
                }
                Err(panic) => {
                    tracing::error!(
                        job_id = %job_id,
                        panic = panic_message(&*panic),
                        "job panicked"
                    );
                    self.failed_jobs.insert(job_id, ErrorCode::UnexpectedError);
                }
            }
        }

        let status = ErrorCode::aggregate(self.failed_jobs.values().copied());
        if self.failed_jobs.is_empty() {
            tracing::info!("all jobs successful");
        } else {
            let summary: Vec<String> = self
                .failed_jobs
                .iter()
                .map(|(id, code)| format!("{id}:{}", code.text()))
                .collect();
            tracing::error!(failed = %summary.join(" "), status = status.code(), "job(s) failed");
        }
        Ok(status)
    }
}

impl<'a, B, L> ExportProcess<'a, B, L>
where
    B: PayloadBuilder<Params = EventsJobParams>,
    L: Backlog<Params = EventsJobParams>,
{
    /// Run the events cycle for the day `date_offset` days before `now`.
    pub fn run_events_cycle(
        &mut self,
        now: DateTime<Utc>,
        date_offset: i64,
    ) -> Result<ErrorCode, ProcessError> {
        let params = EventsJobParams::for_day_offset(now, date_offset)
            .ok_or(ProcessError::DateOutOfRange(date_offset))?;
        tracing::info!(extract_date = %params.extract_date, "starting events export");
        self.run(params)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
