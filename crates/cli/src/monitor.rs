//! Startup and shutdown of the status watcher daemon.
//!
//! The blocking HTTP client runs its own runtime internally, so it must be
//! created, used and dropped outside of any async context. The watcher is
//! started from plain `main`, and tokio only waits for the stop signal.

use std::time::Duration;

use anyhow::Context;
use dwh_infra::portal::HttpPortalClient;
use dwh_infra::store::FilePendingJobsQueue;
use dwh_infra::{ProcessConfig, StatusWatcher, WatcherHandle};

/// Build the portal client and start the watcher thread.
pub fn start_watcher(config: &ProcessConfig, period: Duration) -> anyhow::Result<WatcherHandle> {
    let portal = HttpPortalClient::new(config).context("cannot create portal client")?;
    let watcher = StatusWatcher::new(
        portal,
        FilePendingJobsQueue::new(&config.storage.pending_jobs_path),
        period,
    )
    .with_tick(config.monitoring.tick());

    watcher.spawn().context("cannot start status watcher")
}

/// Block until SIGINT/SIGTERM, or until the watcher loop ended by itself.
pub fn block_until_stop(handle: &WatcherHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(wait_for_stop(handle));
    Ok(())
}

async fn wait_for_stop(handle: &WatcherHandle) {
    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    let terminate = terminate_signal();
    tokio::pin!(terminate);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
                return;
            }
            _ = &mut terminate => {
                tracing::info!("received SIGTERM");
                return;
            }
            _ = liveness.tick() => {
                if handle.is_finished() {
                    tracing::warn!("status watcher stopped by itself");
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
