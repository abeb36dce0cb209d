//! Layered settings: defaults, config file, environment, then CLI flags.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use queuewatch_types::Thresholds;

use crate::duration::parse_duration;

pub const DEFAULT_RABBITMQ_URL: &str = "http://localhost:15672";
pub const DEFAULT_USERNAME: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_SCRAPE_INTERVAL: &str = "15s";
pub const DEFAULT_LISTEN_PORT: u16 = 9419;
pub const DEFAULT_TIMEOUT: &str = "10s";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "QUEUEWATCH";

/// Directories searched for `config.yaml` when no file is given explicitly.
pub const CONFIG_SEARCH_DIRS: &[&str] = &[".", "/etc/queuewatch"];

const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub rabbitmq_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
    pub scrape_interval: Option<String>,
    pub listen_port: Option<u16>,
    pub timeout: Option<String>,
    pub log_level: Option<String>,
}

/// Validated exporter settings.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub rabbitmq_url: String,
    pub username: String,
    pub password: String,
    /// Restrict polling to one vhost; `None` polls all of them.
    pub vhost: Option<String>,
    pub scrape_interval: Duration,
    pub listen_port: u16,
    /// Deadline for the startup and `/health` broker checks, and the HTTP
    /// client's per-request timeout.
    pub timeout: Duration,
    pub log_level: String,
    pub thresholds: Thresholds,
}

// Keeps the password out of logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("rabbitmq_url", &self.rabbitmq_url)
            .field("username", &self.username)
            .field("vhost", &self.vhost)
            .field("scrape_interval", &self.scrape_interval)
            .field("listen_port", &self.listen_port)
            .field("timeout", &self.timeout)
            .field("log_level", &self.log_level)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    rabbitmq_url: String,
    rabbitmq_username: String,
    rabbitmq_password: String,
    #[serde(default)]
    vhost: Option<String>,
    scrape_interval: String,
    listen_port: u16,
    timeout: String,
    log_level: String,
    #[serde(default)]
    thresholds: Thresholds,
}

impl Settings {
    /// Load settings from all layers, using the process environment and the
    /// standard config file locations.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let search_dirs: Vec<PathBuf> = CONFIG_SEARCH_DIRS.iter().map(PathBuf::from).collect();
        Self::load_from(overrides, &search_dirs, None)
    }

    /// Load settings, searching `search_dirs` for a config file and reading
    /// overrides from `env` instead of the process environment if given.
    pub fn load_from(
        overrides: &Overrides,
        search_dirs: &[PathBuf],
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("rabbitmq_url", DEFAULT_RABBITMQ_URL)?
            .set_default("rabbitmq_username", DEFAULT_USERNAME)?
            .set_default("rabbitmq_password", DEFAULT_PASSWORD)?
            .set_default("scrape_interval", DEFAULT_SCRAPE_INTERVAL)?
            .set_default("listen_port", i64::from(DEFAULT_LISTEN_PORT))?
            .set_default("timeout", DEFAULT_TIMEOUT)?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?;

        if let Some(path) = config_file(overrides.config_file.as_deref(), search_dirs)? {
            tracing::debug!(path = %path.display(), "reading config file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(env),
        );

        let raw: RawSettings = builder
            .set_override_option("rabbitmq_url", overrides.rabbitmq_url.clone())?
            .set_override_option("rabbitmq_username", overrides.username.clone())?
            .set_override_option("rabbitmq_password", overrides.password.clone())?
            .set_override_option("vhost", overrides.vhost.clone())?
            .set_override_option("scrape_interval", overrides.scrape_interval.clone())?
            .set_override_option("listen_port", overrides.listen_port.map(i64::from))?
            .set_override_option("timeout", overrides.timeout.clone())?
            .set_override_option("log_level", overrides.log_level.clone())?
            .build()?
            .try_deserialize()?;

        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let rabbitmq_url = or_default(raw.rabbitmq_url, DEFAULT_RABBITMQ_URL);
        if !(rabbitmq_url.starts_with("http://") || rabbitmq_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "rabbitmq_url",
                reason: format!("{rabbitmq_url:?} must start with http:// or https://"),
            });
        }

        let scrape_interval = non_zero_duration(
            "scrape_interval",
            &or_default(raw.scrape_interval, DEFAULT_SCRAPE_INTERVAL),
        )?;
        let timeout = non_zero_duration("timeout", &or_default(raw.timeout, DEFAULT_TIMEOUT))?;

        if raw.listen_port == 0 {
            return Err(ConfigError::Invalid {
                field: "listen_port",
                reason: "must not be 0".to_string(),
            });
        }

        Ok(Self {
            rabbitmq_url,
            username: or_default(raw.rabbitmq_username, DEFAULT_USERNAME),
            password: or_default(raw.rabbitmq_password, DEFAULT_PASSWORD),
            vhost: raw
                .vhost
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            scrape_interval,
            listen_port: raw.listen_port,
            timeout,
            log_level: or_default(raw.log_level, DEFAULT_LOG_LEVEL),
            thresholds: raw.thresholds,
        })
    }
}

/// The explicit config file, which must exist, or the first `config.yaml`
/// found in `search_dirs`.
fn config_file(
    explicit: Option<&Path>,
    search_dirs: &[PathBuf],
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        return Ok(Some(path.to_path_buf()));
    }

    Ok(search_dirs
        .iter()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|path| path.is_file()))
}

fn or_default(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn non_zero_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let duration = parse_duration(value).map_err(|err| ConfigError::Invalid {
        field,
        reason: err.to_string(),
    })?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
