//! Remote job status watcher.
//!
//! Periodically asks the portal for the status of every pending remote job
//! and forgets the ones the portal is done with. The queue is reloaded from
//! storage before every poll so jobs registered by export runs in the
//! meantime are picked up.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::portal::{PortalClient, RemoteJobStatus};
use crate::store::{PendingJobsQueue, StoreError};

/// Outcome of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Finished successfully, removed from the queue.
    pub completed: usize,
    /// Finished with an error, removed from the queue.
    pub failed: usize,
    /// Still being processed.
    pub in_progress: usize,
    /// Status request failed; asked again on the next poll.
    pub unreachable: usize,
}

impl PollSummary {
    pub fn polled(&self) -> usize {
        self.completed + self.failed + self.in_progress + self.unreachable
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot spawn watcher thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("watcher thread panicked")]
    Panicked,
}

pub struct StatusWatcher<P, Q> {
    portal: P,
    queue: Q,
    period: Duration,
    tick: Duration,
}

impl<P, Q> StatusWatcher<P, Q>
where
    P: PortalClient,
    Q: PendingJobsQueue,
{
    pub fn new(portal: P, queue: Q, period: Duration) -> Self {
        Self {
            portal,
            queue,
            period,
            tick: Duration::from_secs(1),
        }
    }

    /// How often the shutdown signal is checked between polls.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Query every pending remote job once.
    ///
    /// Status request failures are logged and leave the id queued. Only a
    /// queue persistence failure is an error.
    pub fn poll_once(&self) -> Result<PollSummary, StoreError> {
        let mut summary = PollSummary::default();

        for id in self.queue.items()? {
            debug!(remote_job_id = %id, "requesting job status");
            match self.portal.job_status(&id) {
                Ok(RemoteJobStatus::Completed) => {
                    info!(remote_job_id = %id, "job completed ok");
                    self.queue.remove(&id)?;
                    summary.completed += 1;
                }
                Ok(RemoteJobStatus::Failed { failure, status }) => {
                    error!(
                        remote_job_id = %id,
                        code = failure.code(),
                        reason = failure.text(),
                        status = status.as_deref().unwrap_or(""),
                        "job failed"
                    );
                    self.queue.remove(&id)?;
                    summary.failed += 1;
                }
                Ok(RemoteJobStatus::InProgress { code }) => {
                    debug!(remote_job_id = %id, code, "job still in progress");
                    summary.in_progress += 1;
                }
                Err(e) => {
                    warn!(remote_job_id = %id, error = %e, "status request failed");
                    summary.unreachable += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Poll every `period` until `shutdown` receives a message or its sender
    /// is dropped.
    ///
    /// The first poll happens immediately. Shutdown is noticed within one
    /// tick, never in the middle of a poll.
    pub fn run(&self, shutdown: &mpsc::Receiver<()>) -> Result<(), StoreError> {
        info!(period = ?self.period, tick = ?self.tick, "status watcher started");
        let mut last_poll: Option<Instant> = None;

        loop {
            if last_poll.is_none_or(|t| t.elapsed() >= self.period) {
                let started = Instant::now();
                let summary = self.poll_once()?;
                if summary.polled() > 0 {
                    info!(
                        completed = summary.completed,
                        failed = summary.failed,
                        in_progress = summary.in_progress,
                        unreachable = summary.unreachable,
                        "poll done"
                    );
                }
                last_poll = Some(started);
            }

            match shutdown.recv_timeout(self.tick) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("terminate request detected");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        info!("status watcher stopped");
        Ok(())
    }
}

impl<P, Q> StatusWatcher<P, Q>
where
    P: PortalClient + 'static,
    Q: PendingJobsQueue + 'static,
{
    /// Run the watcher on its own thread.
    pub fn spawn(self) -> Result<WatcherHandle, WatcherError> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("status-watcher".to_string())
            .spawn(move || self.run(&shutdown_rx))
            .map_err(WatcherError::Spawn)?;

        Ok(WatcherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Handle to control a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Result<(), StoreError>>>,
}

impl WatcherHandle {
    /// Request graceful shutdown and wait for the loop to end.
    pub fn shutdown(mut self) -> Result<(), WatcherError> {
        let _ = self.shutdown.send(());
        match self.join.take() {
            Some(join) => match join.join() {
                Ok(result) => result.map_err(WatcherError::from),
                Err(_) => Err(WatcherError::Panicked),
            },
            None => Ok(()),
        }
    }

    /// Whether the loop ended on its own (persistence failure or panic).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
}
