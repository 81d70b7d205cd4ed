//! Top-level configuration: one JSON file, selected by `--config` or
//! `CONFIG_FILE_PATH`, with secret-bearing fields overridable from the
//! environment.

use archiver::{ArchiverConfig, DbConfig};
use logging::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_CONFIG_FILE_PATH: &str = "CONFIG_FILE_PATH";
pub const ENV_DB_USERNAME: &str = "DB_USERNAME";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_PRIVATE_KEY: &str = "PRIVATE_KEY";

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_address")]
    pub address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_api_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_config: LoggerConfig,
    pub db_config: DbConfig,
    pub syncer_config: ArchiverConfig,
    #[serde(default)]
    pub api_config: ApiConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse config {}: {e}", path.display()))?;
        config.apply_env_overrides();
        if config.syncer_config.metrics.enable && config.syncer_config.metrics.address.is_empty() {
            config.syncer_config.metrics.address = default_metrics_address();
        }
        config.syncer_config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var(ENV_DB_USERNAME) {
            self.db_config.username = username;
        }
        if let Ok(password) = std::env::var(ENV_DB_PASSWORD) {
            self.db_config.password = password;
        }
        if let Ok(private_key) = std::env::var(ENV_PRIVATE_KEY) {
            self.syncer_config.private_key = private_key;
        }
    }
}
