//! # Configuration Management
//!
//! Handles all configuration for meterbase components. Everything has a
//! default, so an empty TOML document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Configuration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("failed to read {}: {}", path.display(), e),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.table_prefix_separator.is_empty() && self.storage.table_prefix.is_some() {
            return Err(Error::Configuration {
                message: "table_prefix_separator must not be empty when table_prefix is set".into(),
            });
        }
        if self.storage.max_versions == 0 {
            return Err(Error::Configuration {
                message: "max_versions must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Optional namespace prepended to every table name
    pub table_prefix: Option<String>,
    pub table_prefix_separator: String,
    pub max_versions: u32,
}

impl StorageConfig {
    /// Physical table name for a logical one
    pub fn table_name(&self, name: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{}{}{}", prefix, self.table_prefix_separator, name),
            None => name.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            table_prefix: None,
            table_prefix_separator: "_".to_string(),
            max_versions: 1,
        }
    }
}

/// Retention configuration. `None` keeps data forever.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub metering_ttl_secs: Option<u64>,
    pub alarm_history_ttl_secs: Option<u64>,
}

impl RetentionConfig {
    pub fn metering_ttl(&self) -> Option<Duration> {
        self.metering_ttl_secs.map(Duration::from_secs)
    }

    pub fn alarm_history_ttl(&self) -> Option<Duration> {
        self.alarm_history_ttl_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `meterbase_storage=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.storage.max_versions, 1);
        assert_eq!(config.storage.table_name("meter"), "meter");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.retention.metering_ttl().is_none());
    }

    #[test]
    fn test_prefix_and_retention() {
        let config = Config::from_toml_str(
            r#"
            [storage]
            table_prefix = "ceilo"

            [retention]
            metering_ttl_secs = 3600

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.table_name("alarm_h"), "ceilo_alarm_h");
        assert_eq!(config.retention.metering_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_config() {
        let err = Config::from_toml_str("[storage]\nmax_versions = 0\n").unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(Config::from_toml_str("[storage\n").is_err());
    }
}
