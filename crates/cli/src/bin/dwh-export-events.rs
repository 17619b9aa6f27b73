//! Export yesterday's (by default) events, retrying earlier failed days first.

use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dwh_cli::{CommonArgs, Runtime, exit_with};
use dwh_core::ErrorCode;
use dwh_infra::ProcessConfig;
use dwh_infra::export::{EVENTS_BACKLOG, ExportProcess};
use dwh_infra::payload::{EventsJobParams, JsonlEventSource, SeriesPayloadBuilder};
use dwh_infra::store::FileBacklog;

#[derive(Parser)]
#[command(name = "dwh-export-events")]
#[command(about = "Upload the event series of one day to the data warehouse")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Days before today to export. Overrides `export.date_offset`.
    #[arg(long, value_name = "DAYS")]
    date_offset: Option<i64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.common.startup() {
        Ok(config) => config,
        Err(code) => return code,
    };

    match run(&config, cli.date_offset.unwrap_or(config.export.date_offset)) {
        Ok(code) => exit_with(code),
        Err(e) => {
            tracing::error!(error = ?e, "export aborted");
            exit_with(ErrorCode::UnexpectedError)
        }
    }
}

fn run(config: &ProcessConfig, date_offset: i64) -> anyhow::Result<ErrorCode> {
    let runtime = Runtime::new(config).context("cannot create portal client")?;
    let backlog = FileBacklog::<EventsJobParams>::open(&config.storage.backlog_dir, EVENTS_BACKLOG)
        .context("cannot open events backlog")?;
    let builder = SeriesPayloadBuilder::new(
        JsonlEventSource::new(&config.sources.events_dir),
        &config.site_code,
        &config.export.var_type,
    )
    .with_contact(&config.contact)
    .with_unit(&config.export.unit)
    .retain_artifacts(config.export.debug);

    let policy = config.retry_policy()?;
    let mut process = ExportProcess::new(&backlog, &builder, runtime.context(), policy)
        .with_build_error_policy(config.export.on_build_error);

    match process.run_events_cycle(Utc::now(), date_offset) {
        Ok(code) => Ok(code),
        Err(e) => {
            tracing::error!(error = %e, "export process aborted");
            Ok(e.code())
        }
    }
}
