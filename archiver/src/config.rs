//! Archiver configuration and startup validation.
//!
//! Everything here is deserialized from the single JSON config file; invalid
//! combinations are rejected before any loop starts.

use sensitive_url::SensitiveUrl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use types::ChainVariant;

/// Lower bound on the re-upload threshold; a bundle cannot plausibly seal
/// faster than this, so smaller values would re-upload healthy bundles.
pub const MIN_REUPLOAD_THRESHOLD_SECS: u64 = 60;

const DEFAULT_CREATE_BUNDLE_INTERVAL: u64 = 30;
const DEFAULT_REUPLOAD_THRESHOLD_SECS: u64 = 3600;

fn default_bundle_interval() -> u64 {
    DEFAULT_CREATE_BUNDLE_INTERVAL
}

fn default_reupload_threshold() -> u64 {
    DEFAULT_REUPLOAD_THRESHOLD_SECS
}

fn default_pool_size() -> u32 {
    catalog::DEFAULT_POOL_SIZE
}

/// How the verify loop checks archived data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Fetch every object back from the bundle service and compare it
    /// blob-by-blob against a fresh chain read.
    #[default]
    PerBlob,
    /// Rebuild the whole bundle locally and compare Reed-Solomon integrity
    /// checksums against the storage provider's sealed metadata.
    Bundle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub address: String,
    /// Storage-provider endpoint polled by the quota monitor.
    #[serde(default)]
    pub sp_endpoint: Option<SensitiveUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub max_open_conns: u32,
    /// Credentials are part of the config contract; the sqlite backend has
    /// no use for them.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub chain: ChainVariant,
    pub bucket_name: String,
    pub start_block_id: u64,
    #[serde(default = "default_bundle_interval")]
    pub create_bundle_interval: u64,
    pub bundle_service_endpoints: Vec<SensitiveUrl>,
    /// Execution JSON-RPC endpoints (both variants).
    pub rpc_endpoints: Vec<SensitiveUrl>,
    /// Beacon REST endpoints; required for the ethereum variant.
    #[serde(default)]
    pub beacon_rpc_endpoints: Vec<SensitiveUrl>,
    /// Greenfield chain endpoint serving storage params and object metadata.
    pub chain_endpoint: SensitiveUrl,
    pub temp_dir: PathBuf,
    /// Hex-encoded secp256k1 key authorising bundle-service writes.
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_reupload_threshold")]
    pub reupload_bundle_threshold_secs: u64,
    #[serde(default)]
    pub verification_mode: VerificationMode,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingBucket,
    MissingEndpoint(&'static str),
    MissingTempDir,
    InvalidPrivateKey,
    InvalidBundleInterval,
    ReuploadThresholdTooLow(u64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingBucket => write!(f, "bucket_name must be set"),
            ConfigError::MissingEndpoint(which) => write!(f, "{which} must not be empty"),
            ConfigError::MissingTempDir => write!(f, "temp_dir must be set"),
            ConfigError::InvalidPrivateKey => {
                write!(f, "private_key must be 32 hex-encoded bytes")
            }
            ConfigError::InvalidBundleInterval => {
                write!(f, "create_bundle_interval must be at least 1")
            }
            ConfigError::ReuploadThresholdTooLow(value) => write!(
                f,
                "reupload_bundle_threshold_secs {value} must be greater than {MIN_REUPLOAD_THRESHOLD_SECS}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ArchiverConfig {
    /// Decodes the configured private key.
    pub fn private_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let stripped = self.private_key.trim_start_matches("0x");
        let bytes = hex::decode(stripped).map_err(|_| ConfigError::InvalidPrivateKey)?;
        if bytes.len() != 32 {
            return Err(ConfigError::InvalidPrivateKey);
        }
        Ok(bytes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_name.is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        if self.bundle_service_endpoints.is_empty() {
            return Err(ConfigError::MissingEndpoint("bundle_service_endpoints"));
        }
        if self.rpc_endpoints.is_empty() {
            return Err(ConfigError::MissingEndpoint("rpc_endpoints"));
        }
        if self.chain == ChainVariant::Ethereum && self.beacon_rpc_endpoints.is_empty() {
            return Err(ConfigError::MissingEndpoint("beacon_rpc_endpoints"));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingTempDir);
        }
        if self.create_bundle_interval == 0 {
            return Err(ConfigError::InvalidBundleInterval);
        }
        if self.reupload_bundle_threshold_secs <= MIN_REUPLOAD_THRESHOLD_SECS {
            return Err(ConfigError::ReuploadThresholdTooLow(
                self.reupload_bundle_threshold_secs,
            ));
        }
        self.private_key_bytes()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ArchiverConfig {
        ArchiverConfig {
            chain: ChainVariant::Ethereum,
            bucket_name: "archive".to_string(),
            start_block_id: 100,
            create_bundle_interval: 30,
            bundle_service_endpoints: vec![SensitiveUrl::parse("https://bundle.example.com").unwrap()],
            rpc_endpoints: vec![SensitiveUrl::parse("https://rpc.example.com").unwrap()],
            beacon_rpc_endpoints: vec![SensitiveUrl::parse("https://beacon.example.com").unwrap()],
            chain_endpoint: SensitiveUrl::parse("https://gf.example.com").unwrap(),
            temp_dir: PathBuf::from("/tmp/blobs"),
            private_key: hex::encode([7u8; 32]),
            reupload_bundle_threshold_secs: 3600,
            verification_mode: VerificationMode::PerBlob,
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn beacon_endpoint_required_for_ethereum() {
        let mut config = valid_config();
        config.beacon_rpc_endpoints.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingEndpoint("beacon_rpc_endpoints"))
        );
        config.chain = ChainVariant::Bsc;
        config.validate().unwrap();
    }

    #[test]
    fn reupload_threshold_must_exceed_minimum() {
        let mut config = valid_config();
        config.reupload_bundle_threshold_secs = 60;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ReuploadThresholdTooLow(60))
        );
        config.reupload_bundle_threshold_secs = 61;
        config.validate().unwrap();
    }

    #[test]
    fn private_key_validation() {
        let mut config = valid_config();
        config.private_key = "0xnothex".to_string();
        assert_eq!(config.validate(), Err(ConfigError::InvalidPrivateKey));
        config.private_key = hex::encode([1u8; 31]);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPrivateKey));
        config.private_key = format!("0x{}", hex::encode([1u8; 32]));
        config.validate().unwrap();
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "chain": "ethereum",
            "bucket_name": "archive",
            "start_block_id": 8762203,
            "bundle_service_endpoints": ["https://bundle.example.com"],
            "rpc_endpoints": ["https://rpc.example.com"],
            "beacon_rpc_endpoints": ["https://beacon.example.com"],
            "chain_endpoint": "https://gf.example.com",
            "temp_dir": "/data/blobs",
            "private_key": "0000000000000000000000000000000000000000000000000000000000000007"
        }"#;
        let config: ArchiverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.create_bundle_interval, 30);
        assert_eq!(config.reupload_bundle_threshold_secs, 3600);
        assert_eq!(config.verification_mode, VerificationMode::PerBlob);
        assert!(!config.metrics.enable);
        config.validate().unwrap();
    }
}
