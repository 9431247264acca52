//! Query API routes

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ApiError, SharedState};
use crate::chain::PinnedHead;
use crate::config::Config;
use crate::conviction::{ChainHead, ConvictionError, ConvictionReader, ConvictionReport, Percentage};
use crate::indexer::{DynReader, IndexWarning, Indexer};
use crate::ipfs::DisplayMetadata;
use crate::model::{
    amount, deposit_id, Address, CollateralVaultDeposit, MetadataKind, Proposal, ProposalDispute, Stake, Strategy,
    StrategyConfig, SybilKind, SybilUser,
};
use crate::store::StoreCounts;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

fn parse_address(value: &str) -> Result<Address, ApiError> {
    value.parse().map_err(|e: crate::error::IndexerError| ApiError::BadRequest(e.to_string()))
}

/// Indexer status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub cursor_block: Option<u64>,
    pub cursor_log_index: Option<u32>,
    pub counts: StoreCounts,
    pub pending_content: usize,
    pub warnings_total: usize,
    pub version: String,
}

/// GET /api/status
pub async fn api_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let indexer = state.indexer.read().await;
    let cursor = indexer.cursor();
    Json(StatusResponse {
        cursor_block: cursor.map(|c| c.0),
        cursor_log_index: cursor.map(|c| c.1),
        counts: indexer.store().counts(),
        pending_content: indexer.pending_content().len(),
        warnings_total: indexer.warnings_total(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct WarningsResponse {
    /// Recorded since start, including those evicted from the ring
    pub total: usize,
    pub warnings: Vec<IndexWarning>,
}

/// GET /api/warnings
pub async fn api_warnings(State(state): State<SharedState>) -> Json<WarningsResponse> {
    let indexer = state.indexer.read().await;
    let warnings: Vec<IndexWarning> = indexer.warnings().cloned().collect();
    Json(WarningsResponse {
        total: indexer.warnings_total(),
        warnings,
    })
}

#[derive(Serialize)]
pub struct StrategyResponse {
    #[serde(flatten)]
    pub strategy: Strategy,
    pub config_params: Option<StrategyConfig>,
    pub proposal_count: usize,
}

/// GET /api/strategies/:id
pub async fn api_strategy(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<StrategyResponse>, ApiError> {
    let address = parse_address(&id)?;
    let indexer = state.indexer.read().await;
    let store = indexer.store();
    let strategy = store
        .strategy(&address)
        .ok_or_else(|| ApiError::NotFound(format!("strategy {} not found", address)))?;
    Ok(Json(StrategyResponse {
        config_params: store.config_of(strategy).cloned(),
        proposal_count: store.proposals_of(&strategy.id).len(),
        strategy: strategy.clone(),
    }))
}

/// GET /api/strategies/:id/proposals
pub async fn api_strategy_proposals(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Proposal>>, ApiError> {
    let address = parse_address(&id)?;
    let indexer = state.indexer.read().await;
    let store = indexer.store();
    let strategy = store
        .strategy(&address)
        .ok_or_else(|| ApiError::NotFound(format!("strategy {} not found", address)))?;
    Ok(Json(store.proposals_of(&strategy.id).into_iter().cloned().collect()))
}

#[derive(Serialize)]
pub struct ProposalResponse {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub stakes: Vec<Stake>,
    pub disputes: Vec<ProposalDispute>,
}

/// GET /api/proposals/:id
pub async fn api_proposal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ProposalResponse>, ApiError> {
    let id = id.to_lowercase();
    let indexer = state.indexer.read().await;
    let store = indexer.store();
    let proposal = store
        .proposal(&id)
        .ok_or_else(|| ApiError::NotFound(format!("proposal {} not found", id)))?;
    Ok(Json(ProposalResponse {
        proposal: proposal.clone(),
        stakes: store.stakes_of(&id).into_iter().cloned().collect(),
        disputes: store.disputes_of(&id).into_iter().cloned().collect(),
    }))
}

/// Conviction report with big integers as decimal strings and
/// percentages rendered for display; `null` means not computable.
#[derive(Debug, Serialize)]
pub struct ConvictionResponse {
    pub proposal_id: String,
    pub block_number: u64,
    pub threshold: String,
    pub updated_conviction: String,
    pub threshold_pct: Option<String>,
    pub total_support_pct: Option<String>,
    pub current_conviction_pct: Option<String>,
    pub blocks_to_pass: Option<u64>,
    pub time_to_pass: Option<u64>,
}

impl ConvictionResponse {
    pub fn new(proposal_id: String, report: ConvictionReport, digits: u32) -> Self {
        let render = |pct: Option<Percentage>| pct.map(|p| p.to_fixed(digits));
        Self {
            proposal_id,
            block_number: report.block_number,
            threshold: report.threshold.to_string(),
            updated_conviction: report.updated_conviction.to_string(),
            threshold_pct: render(report.threshold_pct),
            total_support_pct: render(report.total_support_pct),
            current_conviction_pct: render(report.current_conviction_pct),
            blocks_to_pass: report.blocks_to_pass,
            time_to_pass: report.time_to_pass,
        }
    }
}

async fn read_conviction<C: ChainHead>(
    index: Arc<RwLock<Indexer<DynReader>>>,
    chain: C,
    config: &Config,
    proposal_id: &str,
) -> Result<ConvictionReport, ConvictionError> {
    ConvictionReader::new(index, chain)
        .with_decimals(config.conviction.decimals)
        .with_block_time(config.chain.block_time_secs)
        .read(proposal_id)
        .await
}

/// GET /api/proposals/:id/conviction
pub async fn api_conviction(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConvictionResponse>, ApiError> {
    let id = id.to_lowercase();
    let pinned = {
        let indexer = state.indexer.read().await;
        let proposal = indexer
            .store()
            .proposal(&id)
            .ok_or_else(|| ApiError::NotFound(format!("proposal {} not found", id)))?;
        indexer.cursor().map(|c| c.0).unwrap_or(proposal.block_last)
    };

    let report = match &state.chain {
        Some(client) => read_conviction(state.indexer.clone(), client.clone(), &state.config, &id).await,
        None => read_conviction(state.indexer.clone(), PinnedHead(pinned), &state.config, &id).await,
    }
    .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(ConvictionResponse::new(id, report, state.config.conviction.display_digits)))
}

#[derive(Serialize)]
pub struct MetadataResponse {
    pub cid: String,
    pub kind: Option<MetadataKind>,
    /// `index` when served from the store, `gateway` otherwise
    pub source: &'static str,
    #[serde(flatten)]
    pub display: DisplayMetadata,
}

/// GET /api/metadata/:cid
pub async fn api_metadata(State(state): State<SharedState>, Path(cid): Path<String>) -> Json<MetadataResponse> {
    let indexed = {
        let indexer = state.indexer.read().await;
        let store = indexer.store();
        if let Some(m) = store.proposal_metadata.get(&cid) {
            Some((MetadataKind::Proposal, m.title.clone(), m.description.clone()))
        } else if let Some(m) = store.pool_metadata.get(&cid) {
            Some((MetadataKind::Pool, m.title.clone(), m.description.clone()))
        } else if let Some(m) = store.covenants.get(&cid) {
            Some((MetadataKind::Covenant, None, m.text.clone()))
        } else {
            store
                .dispute_metadata
                .get(&cid)
                .map(|m| (MetadataKind::Dispute, None, m.reason.clone()))
        }
    };

    let response = match indexed {
        Some((kind, title, description)) => MetadataResponse {
            cid,
            kind: Some(kind),
            source: "index",
            display: DisplayMetadata::from_fields(title, description),
        },
        None => {
            let display = state.resolver.resolve(&cid).await;
            MetadataResponse {
                cid,
                kind: None,
                source: "gateway",
                display,
            }
        }
    };
    Json(response)
}

/// GET /api/sybil/:kind/:user
pub async fn api_sybil_user(
    State(state): State<SharedState>,
    Path((kind, user)): Path<(String, String)>,
) -> Result<Json<SybilUser>, ApiError> {
    let kind: SybilKind = kind.parse().map_err(ApiError::BadRequest)?;
    let user = parse_address(&user)?;
    let indexer = state.indexer.read().await;
    indexer
        .store()
        .sybil_user(kind, &user)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} user {} not found", kind.as_str(), user)))
}

/// GET /api/deposits/:vault/:proposal/:user
pub async fn api_deposit(
    State(state): State<SharedState>,
    Path((vault, proposal, user)): Path<(String, String, String)>,
) -> Result<Json<CollateralVaultDeposit>, ApiError> {
    let vault = parse_address(&vault)?;
    let user = parse_address(&user)?;
    let proposal = amount::parse(&proposal)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid proposal id: {}", proposal)))?;
    let id = deposit_id(&vault, &proposal, &user);
    let indexer = state.indexer.read().await;
    indexer
        .store()
        .deposits
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("deposit {} not found", id)))
}
