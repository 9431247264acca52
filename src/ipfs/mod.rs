//! Content-addressed metadata resolution
//!
//! Fetches JSON documents from an IPFS HTTP gateway. Content at a CID
//! never changes, so every fetch is safe to repeat. Display callers go
//! through [`MetadataResolver::resolve`], which never fails: any error
//! collapses to the fallback strings.

pub mod ingest;

use std::str::FromStr;
use std::time::Duration;

use cid::Cid;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::IpfsConfig;
use crate::indexer::{parse_metadata, MetadataDocument, ParseError};
use crate::model::MetadataKind;

pub use ingest::{ContentIngestor, IngestReport};

pub const FALLBACK_TITLE: &str = "No title found";
pub const FALLBACK_DESCRIPTION: &str = "No description found";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid CID {cid}: {reason}")]
    InvalidCid { cid: String, reason: String },

    #[error("Gateway request failed: {0}")]
    Network(String),

    #[error("Gateway returned {status} for {cid}")]
    Status { cid: String, status: u16 },

    #[error("Unparseable metadata: {0}")]
    Parse(#[from] ParseError),
}

/// Title and description ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetadata {
    pub title: String,
    pub description: String,
}

impl DisplayMetadata {
    pub fn fallback() -> Self {
        Self {
            title: FALLBACK_TITLE.to_string(),
            description: FALLBACK_DESCRIPTION.to_string(),
        }
    }

    /// Fill absent or empty fields with the fallback strings.
    pub fn from_fields(title: Option<String>, description: Option<String>) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            title: non_empty(title).unwrap_or_else(|| FALLBACK_TITLE.to_string()),
            description: non_empty(description).unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string()),
        }
    }
}

/// Gateway client, built once at startup and shared by handle
#[derive(Clone)]
pub struct MetadataResolver {
    client: reqwest::Client,
    gateway: String,
    timeout: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl MetadataResolver {
    pub fn new(config: &IpfsConfig) -> Self {
        let mut gateway = config.gateway.clone();
        if !gateway.ends_with('/') {
            gateway.push('/');
        }
        Self {
            client: reqwest::Client::new(),
            gateway,
            timeout: Duration::from_secs(config.timeout_secs),
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    /// GET `{gateway}{cid}` once.
    pub async fn fetch(&self, cid: &str) -> Result<Vec<u8>, MetadataError> {
        let parsed = Cid::from_str(cid).map_err(|e| MetadataError::InvalidCid {
            cid: cid.to_string(),
            reason: e.to_string(),
        })?;

        let url = format!("{}{}", self.gateway, cid);
        debug!(cid = %parsed, url = %url, "Fetching metadata");
        let response = self
            .client
            .get(&url)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MetadataError::Status {
                cid: cid.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Fetch with doubling backoff between attempts. Invalid CIDs fail fast.
    pub async fn fetch_with_retry(&self, cid: &str) -> Result<Vec<u8>, MetadataError> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 1;
        loop {
            match self.fetch(cid).await {
                Ok(bytes) => return Ok(bytes),
                Err(e @ MetadataError::InvalidCid { .. }) => return Err(e),
                Err(e) if attempt >= self.retry_attempts => return Err(e),
                Err(e) => {
                    debug!(cid, attempt, error = %e, "Metadata fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch and parse as `kind`.
    pub async fn fetch_document(&self, cid: &str, kind: MetadataKind) -> Result<MetadataDocument, MetadataError> {
        let bytes = self.fetch_with_retry(cid).await?;
        Ok(parse_metadata(kind, &bytes)?)
    }

    /// Title and description for display. Never fails.
    pub async fn resolve(&self, cid: &str) -> DisplayMetadata {
        match self.fetch_document(cid, MetadataKind::Proposal).await {
            Ok(MetadataDocument::Proposal { title, description }) => DisplayMetadata::from_fields(title, description),
            Ok(_) => DisplayMetadata::fallback(),
            Err(e) => {
                warn!(cid, error = %e, "Metadata unavailable, using fallback");
                DisplayMetadata::fallback()
            }
        }
    }
}
