//! One export job: build, upload with bounded retries, clean up.

use std::thread;

use dwh_core::{ErrorCode, JobId, RemoteJobId, RetryPolicy};

use super::JobContext;
use crate::payload::{BuildError, PayloadBuilder};
use crate::portal::{PortalError, Upload, UploadTarget};
use crate::store::StoreError;

/// Outcome of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Exported records; zero when there was nothing to export.
    pub record_count: usize,
    /// Remote job registered for status monitoring, if any.
    pub remote_job_id: Option<RemoteJobId>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The payload could not be built. Not retried.
    #[error("cannot build payload: {0}")]
    Build(#[from] BuildError),
    /// Every upload attempt failed.
    #[error("upload failed after {attempts} attempt(s): {last}")]
    Transport { attempts: u32, last: PortalError },
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// A durable store could not be updated. Fatal for the whole run.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl JobError {
    pub fn code(&self) -> ErrorCode {
        match self {
            JobError::Build(_) => ErrorCode::BuildError,
            JobError::Transport { .. } => ErrorCode::TransportError,
            JobError::Unexpected(_) | JobError::Persistence(_) => ErrorCode::UnexpectedError,
        }
    }
}

/// A single execution of one backlog entry.
///
/// Constructed fresh for every attempt at the entry. Temporary artifacts
/// belong to the built payload and are released when `run` returns,
/// whatever the outcome.
pub struct ExportJob<'a, B: PayloadBuilder> {
    job_id: JobId,
    params: &'a B::Params,
    builder: &'a B,
    target: UploadTarget,
    context: JobContext<'a>,
}

impl<'a, B: PayloadBuilder> ExportJob<'a, B> {
    pub fn new(
        job_id: JobId,
        params: &'a B::Params,
        builder: &'a B,
        target: UploadTarget,
        context: JobContext<'a>,
    ) -> Self {
        Self {
            job_id,
            params,
            builder,
            target,
            context,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Build the payload and upload it.
    ///
    /// Up to `policy.max_attempts()` uploads are made, separated by
    /// `policy.delay()`. The calling thread sleeps in between.
    pub fn run(&self, policy: &RetryPolicy) -> Result<ExportReport, JobError> {
        let job_id = self.job_id;

        let Some(payload) = self.builder.build(self.params, self.context.staging_dir)? else {
            tracing::info!(job_id = %job_id, "nothing to export");
            return Ok(ExportReport {
                record_count: 0,
                remote_job_id: None,
            });
        };

        let upload = Upload {
            target: self.target,
            body: &payload.body,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(job_id = %job_id, attempt, "upload attempt");

            match self.context.portal.upload(&upload) {
                Ok(receipt) => {
                    tracing::info!(
                        job_id = %job_id,
                        attempt,
                        records = payload.record_count,
                        message = receipt.message.as_deref().unwrap_or(""),
                        remote_job_id = ?receipt.remote_job_id.as_ref().map(RemoteJobId::as_str),
                        "upload successful"
                    );
                    if let Some(remote_id) = &receipt.remote_job_id {
                        self.context.pending.append(remote_id)?;
                    }
                    return Ok(ExportReport {
                        record_count: payload.record_count,
                        remote_job_id: receipt.remote_job_id,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(job_id = %job_id, error = %e, "upload aborted");
                    return Err(JobError::Unexpected(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        error = %e,
                        "upload failed"
                    );
                    if !policy.should_retry(attempt) {
                        tracing::error!(
                            job_id = %job_id,
                            max_attempts = policy.max_attempts(),
                            "max attempts exhausted"
                        );
                        return Err(JobError::Transport { attempts: attempt, last: e });
                    }
                    tracing::info!(job_id = %job_id, delay = ?policy.delay(), "retrying");
                    thread::sleep(policy.delay());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::testing::{Behavior, TestBuilder};
    use crate::portal::testing::{ScriptedPortal, http_error, receipt};
    use crate::store::{InMemoryPendingJobsQueue, PendingJobsQueue};
    use std::time::Duration;

    struct Fixture {
        portal: ScriptedPortal,
        pending: InMemoryPendingJobsQueue,
        staging: tempfile::TempDir,
    }

    impl Fixture {
        fn new(portal: ScriptedPortal) -> Self {
            Self {
                portal,
                pending: InMemoryPendingJobsQueue::new(),
                staging: tempfile::tempdir().unwrap(),
            }
        }

        fn context(&self) -> JobContext<'_> {
            JobContext {
                portal: &self.portal,
                pending: &self.pending,
                staging_dir: self.staging.path(),
            }
        }

        fn run(
            &self,
            builder: &TestBuilder,
            behavior: Behavior,
            policy: RetryPolicy,
        ) -> Result<ExportReport, JobError> {
            ExportJob::new(JobId::new(), &behavior, builder, UploadTarget::Series, self.context())
                .run(&policy)
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.staging.path()).unwrap().count()
        }
    }

    fn policy(max_attempts: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(delay_ms)).unwrap()
    }

    #[test]
    fn zero_records_is_success_without_upload() {
        let fx = Fixture::new(ScriptedPortal::new());

        let report = fx.run(&TestBuilder::new(), Behavior::Empty, policy(3, 0)).unwrap();

        assert_eq!(report.record_count, 0);
        assert!(report.remote_job_id.is_none());
        assert_eq!(fx.portal.upload_count(), 0);
    }

    #[test]
    fn accepted_upload_registers_remote_job() {
        let fx = Fixture::new(ScriptedPortal::accepting(Some("4711")));

        let report = fx.run(&TestBuilder::new(), Behavior::Archive(5), policy(3, 0)).unwrap();

        assert_eq!(report.record_count, 5);
        assert_eq!(report.remote_job_id.unwrap().as_str(), "4711");
        assert_eq!(
            fx.pending.items().unwrap(),
            vec![RemoteJobId::new("4711").unwrap()]
        );
        assert_eq!(fx.portal.upload_targets(), vec![UploadTarget::Series]);
        assert_eq!(fx.staged_files(), 0);
    }

    #[test]
    fn accepted_upload_without_id_queues_nothing() {
        let fx = Fixture::new(ScriptedPortal::accepting(None));

        fx.run(&TestBuilder::new(), Behavior::Bytes(1), policy(1, 0)).unwrap();

        assert!(fx.pending.is_empty().unwrap());
    }

    #[test]
    fn always_failing_upload_makes_exactly_max_attempts() {
        let fx = Fixture::new(ScriptedPortal::new());
        let delay = Duration::from_millis(40);

        let err = fx
            .run(&TestBuilder::new(), Behavior::Archive(1), policy(3, 40))
            .unwrap_err();

        assert!(matches!(err, JobError::Transport { attempts: 3, .. }));
        assert_eq!(err.code(), ErrorCode::TransportError);
        assert_eq!(fx.portal.upload_count(), 3);
        let instants = fx.portal.upload_instants();
        for pair in instants.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= delay);
        }
        // The archive is gone even though the job failed.
        assert_eq!(fx.staged_files(), 0);
    }

    #[test]
    fn recovers_when_a_later_attempt_succeeds() {
        let portal = ScriptedPortal::new();
        portal.push_upload(Err(http_error(503)));
        portal.push_upload(Ok(receipt(Some("9"))));
        let fx = Fixture::new(portal);

        let report = fx.run(&TestBuilder::new(), Behavior::Archive(2), policy(3, 0)).unwrap();

        assert_eq!(report.remote_job_id.unwrap().as_str(), "9");
        assert_eq!(fx.portal.upload_count(), 2);
    }

    #[test]
    fn build_error_skips_upload() {
        let fx = Fixture::new(ScriptedPortal::accepting(Some("1")));

        let err = fx
            .run(&TestBuilder::new(), Behavior::BuildFailure, policy(3, 0))
            .unwrap_err();

        assert!(matches!(err, JobError::Build(_)));
        assert_eq!(err.code(), ErrorCode::BuildError);
        assert_eq!(fx.portal.upload_count(), 0);
    }

    #[test]
    fn debug_retention_keeps_the_archive() {
        let fx = Fixture::new(ScriptedPortal::accepting(None));
        let builder = TestBuilder::new().retaining();

        fx.run(&builder, Behavior::Archive(1), policy(1, 0)).unwrap();

        assert_eq!(fx.staged_files(), 1);
    }

    #[test]
    fn unreadable_payload_is_not_retried() {
        let fx = Fixture::new(ScriptedPortal::new());
        fx.portal.push_upload(Err(crate::portal::PortalError::Payload {
            path: "/nonexistent.zip".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }));

        let err = fx
            .run(&TestBuilder::new(), Behavior::Archive(1), policy(3, 0))
            .unwrap_err();

        assert!(matches!(err, JobError::Unexpected(_)));
        assert_eq!(fx.portal.upload_count(), 1);
    }

    #[test]
    fn pending_queue_failure_is_a_persistence_error() {
        struct BrokenQueue;
        impl PendingJobsQueue for BrokenQueue {
            fn append(&self, _: &RemoteJobId) -> Result<(), StoreError> {
                Err(StoreError::io(
                    std::path::Path::new("/ro/pending-jobs"),
                    std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                ))
            }
            fn remove(&self, _: &RemoteJobId) -> Result<bool, StoreError> {
                Ok(false)
            }
            fn items(&self) -> Result<Vec<RemoteJobId>, StoreError> {
                Ok(Vec::new())
            }
            fn clear(&self) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let portal = ScriptedPortal::accepting(Some("1"));
        let staging = tempfile::tempdir().unwrap();
        let context = JobContext {
            portal: &portal,
            pending: &BrokenQueue,
            staging_dir: staging.path(),
        };
        let builder = TestBuilder::new();

        let params = Behavior::Bytes(1);
        let err = ExportJob::new(JobId::new(), &params, &builder, UploadTarget::Series, context)
            .run(&policy(1, 0))
            .unwrap_err();

        assert!(matches!(err, JobError::Persistence(_)));
    }
}
