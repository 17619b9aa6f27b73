//! Follow the remote processing of uploaded data until told to stop.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use dwh_cli::monitor::{block_until_stop, start_watcher};
use dwh_cli::{CommonArgs, exit_with};
use dwh_core::ErrorCode;

#[derive(Parser)]
#[command(name = "dwh-monitord")]
#[command(about = "Poll the data warehouse for the status of uploaded jobs")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Seconds between two polls. Overrides `monitoring.status_monitoring_period_secs`.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    period: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.common.startup() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let period = cli
        .period
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.monitoring.period());

    let handle = match start_watcher(&config, period) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = ?e, "startup failed");
            return exit_with(ErrorCode::UnexpectedError);
        }
    };

    if let Err(e) = block_until_stop(&handle) {
        tracing::error!(error = %e, "cannot wait for stop signals");
    }

    match handle.shutdown() {
        Ok(()) => exit_with(ErrorCode::Success),
        Err(e) => {
            tracing::error!(error = %e, "status watcher failed");
            exit_with(ErrorCode::UnexpectedError)
        }
    }
}
