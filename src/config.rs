//! Indexer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::IndexerError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub ipfs: IpfsConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub conviction: ConvictionConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Directory holding the snapshot database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Warnings kept in memory for inspection
    #[serde(default = "default_warning_capacity")]
    pub warning_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Gateway base URL, the CID is appended
    #[serde(default = "default_gateway")]
    pub gateway: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay, doubled on every attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Concurrent fetches during ingestion
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint for the live head; unset pins the head to the cursor
    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionConfig {
    /// Fixed-point precision of percentage division
    #[serde(default = "default_decimals")]
    pub decimals: u32,

    /// Digits after the point when rendering percentages
    #[serde(default = "default_display_digits")]
    pub display_digits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_warning_capacity() -> usize { crate::indexer::DEFAULT_WARNING_CAPACITY }
fn default_gateway() -> String { "https://ipfs.io/ipfs/".to_string() }
fn default_timeout_secs() -> u64 { 10 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 500 }
fn default_fetch_concurrency() -> usize { 8 }
fn default_block_time_secs() -> u64 { 12 }
fn default_decimals() -> u32 { crate::conviction::DEFAULT_PRECISION_DECIMALS }
fn default_display_digits() -> u32 { 2 }
fn default_http_port() -> u16 { 8080 }

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            warning_capacity: default_warning_capacity(),
        }
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            block_time_secs: default_block_time_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ConvictionConfig {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            display_digits: default_display_digits(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { http_port: default_http_port() }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub rpc_url: Option<String>,
    pub ipfs_gateway: Option<String>,
}

impl Config {
    /// Read a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, IndexerError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| IndexerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(data_dir) = overrides.data_dir {
            self.indexer.data_dir = data_dir;
        }
        if let Some(rpc_url) = overrides.rpc_url {
            self.chain.rpc_url = Some(rpc_url);
        }
        if let Some(gateway) = overrides.ipfs_gateway {
            self.ipfs.gateway = gateway;
        }
    }
}
