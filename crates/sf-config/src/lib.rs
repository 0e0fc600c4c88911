//! SmsFlow configuration.
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Reject configurations the gateway cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        if self.reconciler.status_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "reconciler.status_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Delivery provider (SMS API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API (SendSMS / MessageStatus endpoints)
    pub base_url: String,
    pub api_key: String,
    pub client_id: String,
    /// Default sender id when a dispatch does not supply one
    pub sender_id: String,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mylogin.co.in/api/v2".to_string(),
            api_key: String::new(),
            client_id: String::new(),
            sender_id: "SMSFLW".to_string(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://smsflow.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Reconciliation sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Seconds between sweeps over messages with unresolved recipients
    pub sweep_interval_seconds: u64,
    /// Max messages examined per sweep
    pub batch_size: u32,
    /// Concurrent outbound status calls per message
    pub status_concurrency: usize,
    /// Hours after which a recipient stuck in `submitted` is marked failed
    pub stale_after_hours: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            batch_size: 50,
            status_concurrency: 10,
            stale_after_hours: 72,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconciler.status_concurrency, 10);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn parses_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[provider]
api_key = "key-1"
client_id = "client-1"

[reconciler]
sweep_interval_seconds = 30
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.provider.api_key, "key-1");
        assert_eq!(config.reconciler.sweep_interval_seconds, 30);
        // Untouched sections keep defaults
        assert_eq!(config.reconciler.stale_after_hours, 72);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.reconciler.status_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
