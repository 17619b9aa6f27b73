//! Process configuration.
//!
//! Loaded once at startup and passed by reference to every component.
//!
//! Precedence (highest first):
//! 1. Environment variables (`DWH_` prefix, `__` for nesting, e.g.
//!    `DWH_SERVER__PASSWORD`)
//! 2. The TOML configuration file
//! 3. Built-in defaults
//!
//! Validation runs after merging. An invalid configuration is fatal and is
//! never retried.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use dwh_core::RetryPolicy;

/// Configuration file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dwh-export/dwh.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DWH_";

pub const SITE_CODE_PLACEHOLDER: &str = "{site_code}";
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),
    #[error("cannot load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Site identifier assigned by the portal.
    pub site_code: String,
    /// Where the portal sends processing reports. May be empty.
    pub contact: String,
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
    pub sources: SourcesConfig,
    pub monitoring: MonitoringConfig,
}

/// Portal endpoints and credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub login: String,
    pub password: String,
    /// Series upload URL, `{site_code}` is substituted.
    pub data_upload_url: String,
    /// Variable definitions upload URL, `{site_code}` is substituted.
    pub cfg_upload_url: String,
    /// Job status URL, `{site_code}` and `{job_id}` are substituted.
    pub job_status_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            login: String::new(),
            password: String::new(),
            data_upload_url:
                "https://api.dwh.example/v1/users/current/sites/{site_code}/variables/series"
                    .to_string(),
            cfg_upload_url: "https://api.dwh.example/v1/users/current/sites/{site_code}/variables"
                .to_string(),
            job_status_url:
                "https://api.dwh.example/v1/users/current/sites/{site_code}/jobs/{job_id}"
                    .to_string(),
            connect_timeout_secs: 60,
            request_timeout_secs: 300,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("data_upload_url", &self.data_upload_url)
            .field("cfg_upload_url", &self.cfg_upload_url)
            .field("job_status_url", &self.job_status_url)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Upload retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 10,
        }
    }
}

/// What to do with a backlog entry whose payload could not be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildErrorPolicy {
    /// Keep the entry; it is attempted again on the next run.
    #[default]
    Retain,
    /// Remove the entry after logging the failure, when the failure comes
    /// from the data itself. Entries failing on I/O are kept.
    Drop,
}

/// Export flow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Days between today and the exported day. The sign is ignored.
    pub date_offset: i64,
    /// Where temporary artifacts are written. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,
    /// Keep temporary artifacts after the job ends.
    pub debug: bool,
    pub on_build_error: BuildErrorPolicy,
    /// Only events of this variable type are exported.
    pub var_type: String,
    /// Only events expressed in this unit are exported.
    pub unit: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            date_offset: 1,
            staging_dir: None,
            debug: false,
            on_build_error: BuildErrorPolicy::Retain,
            var_type: "energy".to_string(),
            unit: "kWh".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Locations of the durable stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backlog_dir: PathBuf,
    pub pending_jobs_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backlog_dir: PathBuf::from("/var/lib/dwh-export/backlog"),
            pending_jobs_path: PathBuf::from("/var/lib/dwh-export/pending-jobs"),
        }
    }
}

/// Locations of the exported data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directory of daily event files (`YYYY-MM-DD.jsonl`).
    pub events_dir: PathBuf,
    /// Device network configuration (JSON).
    pub devices_config_path: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            events_dir: PathBuf::from("/var/lib/dwh-export/events"),
            devices_config_path: PathBuf::from("/etc/dwh-export/devices.json"),
        }
    }
}

/// Status watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub status_monitoring_period_secs: u64,
    pub tick_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            status_monitoring_period_secs: 300,
            tick_interval_ms: 1000,
        }
    }
}

impl MonitoringConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.status_monitoring_period_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl ProcessConfig {
    /// Load and validate the configuration.
    ///
    /// An explicitly given file must exist. Without one, the default file
    /// is used when present, so a deployment may rely on environment
    /// variables only.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.to_path_buf())),
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
        };

        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        Self::from_figment(figment)
    }

    /// Load from a TOML document. Environment variables are not consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_code.trim().is_empty() {
            return Err(ConfigError::invalid("site_code", "must not be empty"));
        }
        if self.server.login.is_empty() {
            return Err(ConfigError::invalid("server.login", "must not be empty"));
        }
        if self.server.password.is_empty() {
            return Err(ConfigError::invalid("server.password", "must not be empty"));
        }
        check_template("server.data_upload_url", &self.server.data_upload_url, false)?;
        check_template("server.cfg_upload_url", &self.server.cfg_upload_url, false)?;
        check_template("server.job_status_url", &self.server.job_status_url, true)?;
        check_positive("server.connect_timeout_secs", self.server.connect_timeout_secs)?;
        check_positive("server.request_timeout_secs", self.server.request_timeout_secs)?;
        check_positive("upload.max_attempts", u64::from(self.upload.max_attempts))?;
        check_positive("upload.retry_delay_secs", self.upload.retry_delay_secs)?;
        check_positive(
            "monitoring.status_monitoring_period_secs",
            self.monitoring.status_monitoring_period_secs,
        )?;
        check_positive("monitoring.tick_interval_ms", self.monitoring.tick_interval_ms)?;
        if self.export.var_type.trim().is_empty() {
            return Err(ConfigError::invalid("export.var_type", "must not be empty"));
        }
        Ok(())
    }

    /// Upload retry policy.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::fixed(
            self.upload.max_attempts,
            Duration::from_secs(self.upload.retry_delay_secs),
        )
        .map_err(|e| ConfigError::invalid("upload.max_attempts", e.to_string()))
    }
}

fn check_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be strictly positive"));
    }
    Ok(())
}

fn check_template(
    field: &'static str,
    template: &str,
    with_job_id: bool,
) -> Result<(), ConfigError> {
    if !template.contains(SITE_CODE_PLACEHOLDER) {
        return Err(ConfigError::invalid(
            field,
            format!("missing {SITE_CODE_PLACEHOLDER} placeholder"),
        ));
    }
    if with_job_id && !template.contains(JOB_ID_PLACEHOLDER) {
        return Err(ConfigError::invalid(
            field,
            format!("missing {JOB_ID_PLACEHOLDER} placeholder"),
        ));
    }
    let sample = template
        .replace(SITE_CODE_PLACEHOLDER, "site")
        .replace(JOB_ID_PLACEHOLDER, "0");
    reqwest::Url::parse(&sample).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    Ok(())
}
