//! Shared plumbing of the command line entry points.

pub mod monitor;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use dwh_core::ErrorCode;
use dwh_infra::ProcessConfig;
use dwh_infra::export::JobContext;
use dwh_infra::portal::HttpPortalClient;
use dwh_infra::store::FilePendingJobsQueue;
use dwh_observability::logging::LogOptions;

/// Flags accepted by every binary.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// Configuration file (TOML). Defaults to /etc/dwh-export/dwh.toml when present.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl CommonArgs {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            verbose: self.verbose,
            json: self.log_json,
        }
    }

    /// Install logging then load the configuration.
    ///
    /// A configuration problem is logged and turned into the exit status of
    /// `ErrorCode::ConfigurationError`.
    pub fn startup(&self) -> Result<ProcessConfig, ExitCode> {
        dwh_observability::init_with(&self.log_options());
        ProcessConfig::load(self.config.as_deref()).map_err(|e| {
            tracing::error!(error = %e, "invalid configuration");
            exit_with(ErrorCode::ConfigurationError)
        })
    }
}

pub fn exit_with(code: ErrorCode) -> ExitCode {
    ExitCode::from(code.exit_status())
}

/// Owned collaborators of the export flows.
pub struct Runtime {
    pub portal: HttpPortalClient,
    pub pending: FilePendingJobsQueue,
    pub staging_dir: PathBuf,
}

impl Runtime {
    pub fn new(config: &ProcessConfig) -> anyhow::Result<Self> {
        let portal = HttpPortalClient::new(config)?;
        Ok(Self {
            portal,
            pending: FilePendingJobsQueue::new(&config.storage.pending_jobs_path),
            staging_dir: config.export.staging_dir(),
        })
    }

    pub fn context(&self) -> JobContext<'_> {
        JobContext {
            portal: &self.portal,
            pending: &self.pending,
            staging_dir: &self.staging_dir,
        }
    }
}
