//! Query API
//!
//! Read-only HTTP/JSON surface over the indexed store:
//! - point lookups (strategy, proposal, sybil user, deposit)
//! - relational lookups (proposals of a strategy)
//! - live conviction reports and metadata resolution

pub mod routes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chain::JsonRpcClient;
use crate::config::Config;
use crate::indexer::{DynReader, Indexer};
use crate::ipfs::MetadataResolver;

/// State shared across handlers
pub struct ApiState {
    pub indexer: Arc<RwLock<Indexer<DynReader>>>,
    pub resolver: MetadataResolver,
    /// Live head source; `None` pins the head to the indexer cursor
    pub chain: Option<JsonRpcClient>,
    pub config: Config,
}

pub type SharedState = Arc<ApiState>;

impl ApiState {
    pub fn new(indexer: Arc<RwLock<Indexer<DynReader>>>, config: Config) -> Self {
        let resolver = MetadataResolver::new(&config.ipfs);
        let chain = config.chain.rpc_url.as_ref().map(|url| {
            JsonRpcClient::new(url.clone(), std::time::Duration::from_secs(config.chain.timeout_secs))
        });
        Self {
            indexer,
            resolver,
            chain,
            config,
        }
    }
}

/// Handler error rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Create the query router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::api_status))
        .route("/api/warnings", get(routes::api_warnings))
        // Pools and proposals
        .route("/api/strategies/:id", get(routes::api_strategy))
        .route("/api/strategies/:id/proposals", get(routes::api_strategy_proposals))
        .route("/api/proposals/:id", get(routes::api_proposal))
        .route("/api/proposals/:id/conviction", get(routes::api_conviction))
        // Content and identity
        .route("/api/metadata/:cid", get(routes::api_metadata))
        .route("/api/sybil/:kind/:user", get(routes::api_sybil_user))
        .route("/api/deposits/:vault/:proposal/:user", get(routes::api_deposit))
        .with_state(state)
}
