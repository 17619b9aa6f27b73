//! Upload the variable definitions of the device network.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dwh_cli::{CommonArgs, Runtime, exit_with};
use dwh_core::ErrorCode;
use dwh_infra::ProcessConfig;
use dwh_infra::export::ConfigurationExportProcess;
use dwh_infra::payload::{DeviceNetworkConfig, VariableDefinitionsBuilder};

#[derive(Parser)]
#[command(name = "dwh-export-config")]
#[command(about = "Upload the variable definitions to the data warehouse")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Device network configuration. Overrides `sources.devices_config_path`.
    #[arg(long, value_name = "PATH")]
    devices: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.common.startup() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let devices = cli
        .devices
        .unwrap_or_else(|| config.sources.devices_config_path.clone());

    match run(&config, &devices) {
        Ok(code) => exit_with(code),
        Err(e) => {
            tracing::error!(error = ?e, "export aborted");
            exit_with(ErrorCode::UnexpectedError)
        }
    }
}

fn run(config: &ProcessConfig, devices: &std::path::Path) -> anyhow::Result<ErrorCode> {
    let network = match DeviceNetworkConfig::load(devices) {
        Ok(network) => network,
        Err(e) => {
            tracing::error!(path = %devices.display(), error = %e, "cannot read device network");
            return Ok(ErrorCode::BuildError);
        }
    };

    let runtime = Runtime::new(config).context("cannot create portal client")?;
    let builder = VariableDefinitionsBuilder::new(&config.site_code, &config.contact);
    let policy = config.retry_policy()?;
    let process = ConfigurationExportProcess::new(&builder, runtime.context(), policy);

    match process.run(&network) {
        Ok(code) => Ok(code),
        Err(e) => {
            tracing::error!(error = %e, "export process aborted");
            Ok(e.code())
        }
    }
}
