//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across the RTU crates, plus the `RtuConfig` structure read by the `rtu`
//! binary at startup.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rtu_common::config::{ConfigLoader, RtuConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = RtuConfig::load(Path::new("rtu.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consts::{
    DEFAULT_ALARM_PERIOD_MS, DEFAULT_APPLY_TIMEOUT_MS, DEFAULT_CLEANUP_INTERVAL_S,
    DEFAULT_JOURNAL_RETENTION_DAYS, DEFAULT_STORE_PATH, DEFAULT_UP_TIMEOUT_MS,
    DRIVER_RETRY_BACKOFF_MS, DRIVER_RETRY_LIMIT, WATCHDOG_PERIOD_MS,
};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across RTU applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "rtu-pumphouse-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "rtu".to_string(),
        }
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── RtuConfig ──────────────────────────────────────────────────────

fn default_up_timeout_ms() -> u64 {
    DEFAULT_UP_TIMEOUT_MS
}

fn default_alarm_period_ms() -> u64 {
    DEFAULT_ALARM_PERIOD_MS
}

fn default_watchdog_period_ms() -> u64 {
    WATCHDOG_PERIOD_MS
}

fn default_retry_limit() -> u32 {
    DRIVER_RETRY_LIMIT
}

fn default_retry_backoff_ms() -> u64 {
    DRIVER_RETRY_BACKOFF_MS
}

fn default_apply_timeout_ms() -> u64 {
    DEFAULT_APPLY_TIMEOUT_MS
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_retention_days() -> u32 {
    DEFAULT_JOURNAL_RETENTION_DAYS
}

fn default_cleanup_interval_s() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_S
}

fn default_backend() -> String {
    "sysfs".to_string()
}

/// Controller link supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// No cyclic frame for this long drops the link to `down`.
    #[serde(default = "default_up_timeout_ms")]
    pub up_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            up_timeout_ms: DEFAULT_UP_TIMEOUT_MS,
        }
    }
}

/// Alarm engine pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Evaluation period [ms].
    #[serde(default = "default_alarm_period_ms")]
    pub period_ms: u64,

    /// Consecutive non-ok reads before a stale-sensor event is journaled.
    /// `None` disables the event.
    #[serde(default)]
    pub stale_read_threshold: Option<u32>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_ALARM_PERIOD_MS,
            stale_read_threshold: None,
        }
    }
}

/// Actuator manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorsConfig {
    /// Watchdog/deferral task period [ms].
    #[serde(default = "default_watchdog_period_ms")]
    pub watchdog_period_ms: u64,

    /// Retries after a transient driver fault.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Sleep between driver retries [ms].
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// An `apply` that takes longer than this is treated as a hard fault [ms].
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    /// Manual override expiry [ms]. 0 = held until the bus asks for something new.
    #[serde(default)]
    pub manual_override_timeout_ms: u64,
}

impl Default for ActuatorsConfig {
    fn default() -> Self {
        Self {
            watchdog_period_ms: WATCHDOG_PERIOD_MS,
            retry_limit: DRIVER_RETRY_LIMIT,
            retry_backoff_ms: DRIVER_RETRY_BACKOFF_MS,
            apply_timeout_ms: DEFAULT_APPLY_TIMEOUT_MS,
            manual_override_timeout_ms: 0,
        }
    }
}

/// Persistence location and journal retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON store file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Journal entries older than this are removed by the cleanup task.
    #[serde(default = "default_retention_days")]
    pub journal_retention_days: u32,

    /// Interval between journal cleanups [s].
    #[serde(default = "default_cleanup_interval_s")]
    pub cleanup_interval_s: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            journal_retention_days: DEFAULT_JOURNAL_RETENTION_DAYS,
            cleanup_interval_s: DEFAULT_CLEANUP_INTERVAL_S,
        }
    }
}

/// Output driver backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalConfig {
    /// Registered backend name (`simulation`, `sysfs`).
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

/// Top-level configuration read from `rtu.toml`.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "rtu-01"
///
/// [controller]
/// up_timeout_ms = 3000
///
/// [alarms]
/// period_ms = 1000
/// stale_read_threshold = 5
///
/// [hal]
/// backend = "simulation"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtuConfig {
    /// Service identity and log level.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Controller liveness.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Alarm engine.
    #[serde(default)]
    pub alarms: AlarmConfig,
    /// Actuator manager.
    #[serde(default)]
    pub actuators: ActuatorsConfig,
    /// Persistence.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Driver backend.
    #[serde(default)]
    pub hal: HalConfig,
}

impl RtuConfig {
    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// 1. `shared.service_name` non-empty
    /// 2. `controller.up_timeout_ms` > 0
    /// 3. `alarms.period_ms` > 0, `stale_read_threshold` != Some(0)
    /// 4. `actuators.watchdog_period_ms` > 0 and < `controller.up_timeout_ms`
    /// 5. `actuators.apply_timeout_ms` > 0
    /// 6. `storage.journal_retention_days` > 0
    /// 7. `hal.backend` non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.controller.up_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "controller.up_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.alarms.period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "alarms.period_ms must be greater than 0".to_string(),
            ));
        }
        if self.alarms.stale_read_threshold == Some(0) {
            return Err(ConfigError::ValidationError(
                "alarms.stale_read_threshold must be at least 1 when set".to_string(),
            ));
        }
        if self.actuators.watchdog_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "actuators.watchdog_period_ms must be greater than 0".to_string(),
            ));
        }
        if self.actuators.watchdog_period_ms >= self.controller.up_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "actuators.watchdog_period_ms ({}) must be below controller.up_timeout_ms ({})",
                self.actuators.watchdog_period_ms, self.controller.up_timeout_ms
            )));
        }
        if self.actuators.apply_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "actuators.apply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.storage.journal_retention_days == 0 {
            return Err(ConfigError::ValidationError(
                "storage.journal_retention_days must be greater than 0".to_string(),
            ));
        }
        if self.hal.backend.is_empty() {
            return Err(ConfigError::ValidationError(
                "hal.backend cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"")
                .unwrap()
                .level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = RtuConfig::load(Path::new("/nonexistent/path/rtu.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = RtuConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = RtuConfig::from_toml("").unwrap();
        assert_eq!(config.controller.up_timeout_ms, DEFAULT_UP_TIMEOUT_MS);
        assert_eq!(config.alarms.period_ms, DEFAULT_ALARM_PERIOD_MS);
        assert_eq!(config.alarms.stale_read_threshold, None);
        assert_eq!(config.actuators.watchdog_period_ms, WATCHDOG_PERIOD_MS);
        assert_eq!(config.actuators.retry_limit, DRIVER_RETRY_LIMIT);
        assert_eq!(config.hal.backend, "sysfs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rtu_config_load_success() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "rtu-test"

[controller]
up_timeout_ms = 5000

[alarms]
period_ms = 500
stale_read_threshold = 3

[actuators]
manual_override_timeout_ms = 60000

[hal]
backend = "simulation"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = RtuConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.shared.service_name, "rtu-test");
        assert_eq!(config.controller.up_timeout_ms, 5000);
        assert_eq!(config.alarms.period_ms, 500);
        assert_eq!(config.alarms.stale_read_threshold, Some(3));
        assert_eq!(config.actuators.manual_override_timeout_ms, 60000);
        assert_eq!(config.hal.backend, "simulation");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_watchdog_slower_than_link_timeout() {
        let mut config = RtuConfig::default();
        config.controller.up_timeout_ms = 100;
        config.actuators.watchdog_period_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_stale_threshold() {
        let mut config = RtuConfig::default();
        config.alarms.stale_read_threshold = Some(0);
        assert!(config.validate().is_err());
    }
}
