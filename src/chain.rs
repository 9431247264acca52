//! Chain head reads over JSON-RPC

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::conviction::ChainHead;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC endpoint returned {0}")]
    Status(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC client for the node backing the pools
#[derive(Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `eth_blockNumber`
    pub async fn latest_block(&self) -> Result<u64, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": [],
        });
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Status(response.status().as_u16()));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        if let Some(error) = rpc.error {
            return Err(ChainError::Rpc { code: error.code, message: error.message });
        }
        let hex = rpc
            .result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))?;
        let block = parse_quantity(&hex)?;
        debug!(block, url = %self.url, "Read chain head");
        Ok(block)
    }
}

#[async_trait]
impl ChainHead for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.latest_block().await
    }
}

/// Chain head pinned to a known block, used when no RPC endpoint is set
#[derive(Debug, Clone, Copy)]
pub struct PinnedHead(pub u64);

#[async_trait]
impl ChainHead for PinnedHead {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.0)
    }
}

/// Decode a JSON-RPC hex quantity (`0x1b4`)
fn parse_quantity(s: &str) -> Result<u64, ChainError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("not a hex quantity: {}", s)))?;
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::InvalidResponse(format!("{}: {}", s, e)))
}
