//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/scope.toml`, missing file means defaults)
//! 2. environment variables prefixed with `SCOPE_`, nested keys separated by
//!    a double underscore (`SCOPE_APPLICATION__LOG_LEVEL=debug`)
//!
//! ```toml
//! [application]
//! name = "scope-adapters"
//! log_level = "info"
//! log_format = "compact"
//!
//! [[devices]]
//! id = "camera"
//! type = "acquire_dual_camera"
//! [devices.config]
//! mode = "split"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scope.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "SCOPE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File or environment could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are inconsistent
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application-wide settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device definitions, built in order
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// `[application]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors (development)
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// Structured JSON for log aggregation
    Json,
}

/// One device to build through its driver factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device identifier
    pub id: String,
    /// Driver type (e.g., "acquire_dual_camera", "asi_xy_stage")
    pub r#type: String,
    /// Disabled devices are skipped at build time
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration, passed to the factory untouched
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_name() -> String {
    "scope-adapters".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Provider stack used by [`AppConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check log level, device ids and device config tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Device of type '{}' has an empty id",
                    device.r#type
                )));
            }
            if device.r#type.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Device '{}' has no type",
                    device.id
                )));
            }
            if !device.config.is_table() {
                return Err(ConfigError::Invalid(format!(
                    "Device '{}' config must be a table",
                    device.id
                )));
            }
            if !ids.insert(device.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate device ID: {}",
                    device.id
                )));
            }
        }

        Ok(())
    }

    /// Devices with `enabled = true`, in order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|device| device.enabled)
    }

    /// First enabled device of `driver_type`.
    pub fn first_of_type(&self, driver_type: &str) -> Option<&DeviceDefinition> {
        self.enabled_devices()
            .find(|device| device.r#type == driver_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, kind: &str) -> DeviceDefinition {
        DeviceDefinition {
            id: id.to_string(),
            r#type: kind.to_string(),
            enabled: true,
            config: empty_table(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.application.log_format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.application.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let config = AppConfig {
            devices: vec![
                device("cam", "acquire_dual_camera"),
                device("cam", "asi_xy_stage"),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device ID: cam"));
    }

    #[test]
    fn rejects_non_table_device_config() {
        let mut stage = device("stage", "asi_xy_stage");
        stage.config = toml::Value::String("COM3".to_string());
        let config = AppConfig {
            devices: vec![stage],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn first_of_type_skips_disabled() {
        let mut first = device("a", "acquire_dual_camera");
        first.enabled = false;
        let config = AppConfig {
            devices: vec![first, device("b", "acquire_dual_camera")],
            ..Default::default()
        };
        assert_eq!(config.first_of_type("acquire_dual_camera").unwrap().id, "b");
        assert!(config.first_of_type("asi_filter_wheel").is_none());
    }
}
