//! Error types for gardens-indexer

use thiserror::Error;

/// Errors surfaced by the store, persistence and configuration layers.
///
/// Event handlers never return these: a bad event is logged and skipped.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Entity not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}
