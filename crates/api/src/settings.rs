//! Service Configuration
//!
//! Built-in defaults, overlaid by an optional TOML file and then by
//! `PROPAGATION__`-prefixed environment variables.

use crate::observability::LogFormat;
use config::{Config, Environment, File};
use feed_client::{FeedConfig, DEFAULT_SOLAR_URL, DEFAULT_STATION_CODE, DEFAULT_STATION_URL};
use fetch_scheduler::SchedulerConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storage::{RecoveryPolicy, StorageConfig};
use thiserror::Error;

/// Config file read from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "propagation.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PROPAGATION_CONFIG";

const ENV_PREFIX: &str = "PROPAGATION";

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub feeds: FeedSettings,
    pub scheduler: SchedulerSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub station_url: String,
    pub solar_url: String,
    pub station_code: String,
    /// Shown next to station readings
    pub station_label: String,
    pub request_timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            station_url: DEFAULT_STATION_URL.to_string(),
            solar_url: DEFAULT_SOLAR_URL.to_string(),
            station_code: DEFAULT_STATION_CODE.to_string(),
            station_label: "El Arenosillo, Spain".to_string(),
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_backoff_cycles: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            fetch_timeout_secs: defaults.fetch_timeout.as_secs(),
            max_backoff_cycles: defaults.max_backoff_cycles,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub station_file: String,
    pub solar_file: String,
    pub max_file_size: u64,
    pub recovery: RecoveryPolicy,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let defaults = StorageConfig::default();
        Self {
            data_dir: defaults.data_dir,
            station_file: defaults.station_file,
            solar_file: defaults.solar_file,
            max_file_size: defaults.max_file_size,
            recovery: defaults.recovery,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Prometheus exporter port; exporter disabled when unset
    pub port: Option<u16>,
}

impl Settings {
    /// Load from `PROPAGATION_CONFIG` (or `propagation.toml` if present)
    /// and the environment, then validate
    pub fn load() -> Result<Self, SettingsError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// Load with an explicit config file, which must exist when given
    pub fn load_from(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => File::from(path),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.bind_addr()?;

        if self.scheduler.interval_secs == 0 {
            return Err(invalid("scheduler.interval_secs must be greater than zero"));
        }
        if self.scheduler.fetch_timeout_secs == 0 {
            return Err(invalid("scheduler.fetch_timeout_secs must be greater than zero"));
        }
        if self.feeds.request_timeout_secs == 0 {
            return Err(invalid("feeds.request_timeout_secs must be greater than zero"));
        }
        if self.storage.max_file_size == 0 {
            return Err(invalid("storage.max_file_size must be greater than zero"));
        }
        if self.feeds.station_code.trim().is_empty() {
            return Err(invalid("feeds.station_code must not be empty"));
        }
        for (key, url) in [
            ("feeds.station_url", &self.feeds.station_url),
            ("feeds.solar_url", &self.feeds.solar_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(&format!("{key} must be an http(s) URL, got {url:?}")));
            }
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.server.bind_addr.parse().map_err(|_| {
            invalid(&format!(
                "server.bind_addr is not a socket address: {:?}",
                self.server.bind_addr
            ))
        })
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            station_url: self.feeds.station_url.clone(),
            solar_url: self.feeds.solar_url.clone(),
            station_code: self.feeds.station_code.clone(),
            request_timeout: Duration::from_secs(self.feeds.request_timeout_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler.interval_secs),
            fetch_timeout: Duration::from_secs(self.scheduler.fetch_timeout_secs),
            max_backoff_cycles: self.scheduler.max_backoff_cycles,
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.storage.data_dir.clone(),
            station_file: self.storage.station_file.clone(),
            solar_file: self.storage.solar_file.clone(),
            max_file_size: self.storage.max_file_size,
            recovery: self.storage.recovery,
        }
    }
}

fn invalid(reason: &str) -> SettingsError {
    SettingsError::Invalid(reason.to_string())
}
