//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "smsflow.toml",
    "./config/smsflow.toml",
    "/etc/smsflow/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("SMSFLOW_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Provider
        if let Ok(val) = env::var("SMSFLOW_PROVIDER_BASE_URL") {
            config.provider.base_url = val;
        }
        if let Ok(val) = env::var("SMSFLOW_PROVIDER_API_KEY") {
            config.provider.api_key = val;
        }
        if let Ok(val) = env::var("SMSFLOW_PROVIDER_CLIENT_ID") {
            config.provider.client_id = val;
        }
        if let Ok(val) = env::var("SMSFLOW_PROVIDER_SENDER_ID") {
            config.provider.sender_id = val;
        }
        if let Ok(val) = env::var("SMSFLOW_PROVIDER_REQUEST_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.provider.request_timeout_seconds = secs;
            }
        }

        // Database
        if let Ok(val) = env::var("SMSFLOW_DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("SMSFLOW_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Reconciler
        if let Ok(val) = env::var("SMSFLOW_RECONCILE_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.reconciler.sweep_interval_seconds = secs;
            }
        }
        if let Ok(val) = env::var("SMSFLOW_RECONCILE_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.reconciler.batch_size = n;
            }
        }
        if let Ok(val) = env::var("SMSFLOW_RECONCILE_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.reconciler.status_concurrency = n;
            }
        }
        if let Ok(val) = env::var("SMSFLOW_RECONCILE_STALE_AFTER_HOURS") {
            if let Ok(hours) = val.parse() {
                config.reconciler.stale_after_hours = hours;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
