//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the monitor runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::{LogFormat, LogLevel};

fn default_interface() -> String {
    "vcan0".to_owned()
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_simulation_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_recorder_root() -> PathBuf {
    PathBuf::from("/opt/r-bms")
}

fn default_extension() -> String {
    "csv".to_owned()
}

fn default_retention_days() -> u32 {
    7
}

fn default_record_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_serve_data() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_grace_period() -> Duration {
    Duration::from_secs(1)
}

/// Primary configuration object for the monitor daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_BMS_CONFIG";
    pub const DEFAULT_CONFIG_PATH: &'static str = "configs/r-bms.toml";

    /// Resolve the configuration file and load it.
    ///
    /// An explicit path must exist. Otherwise `R_BMS_CONFIG` is consulted,
    /// then [`Self::DEFAULT_CONFIG_PATH`]; when neither yields a file the
    /// defaults are returned unvalidated so CLI overrides can still apply.
    pub fn load_with_source(explicit: Option<&Path>) -> Result<LoadedAppConfig> {
        if let Some(path) = explicit {
            let config = Self::from_path(path)?;
            return Ok(LoadedAppConfig {
                config,
                source: Some(path.to_path_buf()),
            });
        }

        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        let fallback = PathBuf::from(Self::DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            let config = Self::from_path(&fallback)?;
            return Ok(LoadedAppConfig {
                config,
                source: Some(fallback),
            });
        }

        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.bus.validate()?;
        self.recorder.validate()?;
        if self.shutdown.grace_period > Duration::from_secs(60) {
            return Err(anyhow!("shutdown grace_period must not exceed 60 seconds"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// CAN bus binding and keep-alive cadence.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_keep_alive_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive_interval: Duration,
    /// Feed the bus from the built-in BMS simulator.
    #[serde(default)]
    pub simulate: bool,
    #[serde(default = "default_simulation_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub simulation_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            keep_alive_interval: default_keep_alive_interval(),
            simulate: false,
            simulation_interval: default_simulation_interval(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(anyhow!("bus interface name must not be empty"));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(anyhow!("bus keep_alive_interval must be greater than zero"));
        }
        if self.simulate && self.simulation_interval.is_zero() {
            return Err(anyhow!("bus simulation_interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Datafile recorder location, naming and retention.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_recorder_root")]
    pub root: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_record_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root: default_recorder_root(),
            extension: default_extension(),
            retention_days: default_retention_days(),
            interval: default_record_interval(),
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(anyhow!("recorder retention_days must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("recorder interval must be greater than zero"));
        }
        let extension = self.extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains(['/', '\\']) {
            return Err(anyhow!(
                "recorder extension '{}' is not a valid file extension",
                self.extension
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// Expose the recorder root under `/data`.
    #[serde(default = "default_serve_data")]
    pub serve_data: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
            serve_data: default_serve_data(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            level: LogLevel::default(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}
