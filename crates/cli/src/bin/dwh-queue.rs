//! Inspect and repair the durable stores of the export.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dwh_cli::{CommonArgs, exit_with};
use dwh_core::{ErrorCode, JobId, RemoteJobId};
use dwh_infra::ProcessConfig;
use dwh_infra::export::EVENTS_BACKLOG;
use dwh_infra::store::{Backlog, FileBacklog, FilePendingJobsQueue, PendingJobsQueue};

#[derive(Parser)]
#[command(name = "dwh-queue")]
#[command(about = "Administration of the export backlog and pending job queue")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remote jobs waiting for a final status
    Pending {
        #[command(subcommand)]
        action: PendingAction,
    },

    /// Export jobs not yet uploaded
    Backlog {
        #[command(subcommand)]
        action: BacklogAction,
    },
}

#[derive(Subcommand)]
enum PendingAction {
    /// Print every queued remote job id
    List,

    /// Stop following a remote job
    Remove { id: RemoteJobId },

    /// Forget every remote job
    Clear,
}

#[derive(Subcommand)]
enum BacklogAction {
    /// Print every entry as JSON
    List {
        #[arg(long, default_value = EVENTS_BACKLOG)]
        name: String,
    },

    /// Give up on an export job
    Purge {
        job_id: JobId,
        #[arg(long, default_value = EVENTS_BACKLOG)]
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.common.startup() {
        Ok(config) => config,
        Err(code) => return code,
    };

    match run(&config, cli.command) {
        Ok(true) => exit_with(ErrorCode::Success),
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = ?e, "command failed");
            exit_with(ErrorCode::UnexpectedError)
        }
    }
}

/// Returns `false` when the targeted item did not exist.
fn run(config: &ProcessConfig, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Pending { action } => {
            let queue = FilePendingJobsQueue::new(&config.storage.pending_jobs_path);
            match action {
                PendingAction::List => {
                    for id in queue.items()? {
                        println!("{id}");
                    }
                }
                PendingAction::Remove { id } => {
                    if !queue.remove(&id)? {
                        eprintln!("remote job {id} is not queued");
                        return Ok(false);
                    }
                }
                PendingAction::Clear => queue.clear()?,
            }
        }
        Commands::Backlog { action } => match action {
            BacklogAction::List { name } => {
                let backlog = open_backlog(config, &name)?;
                for entry in backlog.snapshot()? {
                    println!("{}", serde_json::to_string(&entry)?);
                }
            }
            BacklogAction::Purge { job_id, name } => {
                let backlog = open_backlog(config, &name)?;
                if !backlog.remove(job_id)? {
                    eprintln!("job {job_id} is not in backlog {name}");
                    return Ok(false);
                }
            }
        },
    }
    Ok(true)
}

fn open_backlog(
    config: &ProcessConfig,
    name: &str,
) -> anyhow::Result<FileBacklog<serde_json::Value>> {
    FileBacklog::open(&config.storage.backlog_dir, name)
        .with_context(|| format!("cannot open backlog {name}"))
}
