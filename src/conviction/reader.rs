//! Live conviction report
//!
//! Joins the indexed snapshot of a proposal with the live chain head and
//! derives the display percentages from one consistent pair of reads.
//! Nothing is cached: every call re-reads both sources.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::*;
use crate::chain::ChainError;
use crate::error::IndexerError;
use crate::indexer::{ContractReader, Indexer};
use crate::model::{Proposal, Strategy, StrategyConfig};

/// Indexed state needed to evaluate one proposal
#[derive(Debug, Clone)]
pub struct ProposalSnapshot {
    pub proposal: Proposal,
    pub strategy: Strategy,
    pub config: StrategyConfig,
}

#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn proposal_snapshot(&self, proposal_id: &str) -> Result<ProposalSnapshot, IndexerError>;
}

#[async_trait]
pub trait ChainHead: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;
}

#[async_trait]
impl<R> IndexSource for Arc<RwLock<Indexer<R>>>
where
    R: ContractReader + Send + Sync,
{
    async fn proposal_snapshot(&self, proposal_id: &str) -> Result<ProposalSnapshot, IndexerError> {
        let indexer = self.read().await;
        let store = indexer.store();
        let proposal = store.proposal(proposal_id).ok_or_else(|| IndexerError::NotFound {
            kind: "proposal",
            id: proposal_id.to_string(),
        })?;
        let strategy = store
            .strategies
            .get(&proposal.strategy)
            .ok_or_else(|| IndexerError::NotFound {
                kind: "strategy",
                id: proposal.strategy.clone(),
            })?;
        let config = store.config_of(strategy).ok_or_else(|| IndexerError::NotFound {
            kind: "strategy_config",
            id: strategy.config.clone(),
        })?;
        Ok(ProposalSnapshot {
            proposal: proposal.clone(),
            strategy: strategy.clone(),
            config: config.clone(),
        })
    }
}

/// Display values for one proposal; `None` percentages are undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvictionReport {
    pub threshold: BigUint,
    pub threshold_pct: Option<Percentage>,
    pub total_support_pct: Option<Percentage>,
    pub current_conviction_pct: Option<Percentage>,
    pub updated_conviction: BigUint,
    /// Head block the report was computed at
    pub block_number: u64,
    pub blocks_to_pass: Option<u64>,
    /// Estimated unix time the proposal passes
    pub time_to_pass: Option<u64>,
}

pub struct ConvictionReader<I, C> {
    index: I,
    chain: C,
    decimals: u32,
    block_time_secs: u64,
}

impl<I: IndexSource, C: ChainHead> ConvictionReader<I, C> {
    pub fn new(index: I, chain: C) -> Self {
        Self {
            index,
            chain,
            decimals: DEFAULT_PRECISION_DECIMALS,
            block_time_secs: 12,
        }
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn with_block_time(mut self, secs: u64) -> Self {
        self.block_time_secs = secs;
        self
    }

    pub async fn read(&self, proposal_id: &str) -> Result<ConvictionReport, ConvictionError> {
        let (snapshot, head) = tokio::join!(
            self.index.proposal_snapshot(proposal_id),
            self.chain.block_number()
        );
        let snapshot = snapshot.map_err(|e| ConvictionError::NotYetAvailable(e.to_string()))?;
        let head = head.map_err(|e| ConvictionError::NotYetAvailable(e.to_string()))?;
        Ok(self.evaluate(&snapshot, head))
    }

    /// Compute the report for a snapshot at `head`.
    pub fn evaluate(&self, snapshot: &ProposalSnapshot, head: u64) -> ConvictionReport {
        let ProposalSnapshot { proposal, strategy, config } = snapshot;

        let blocks_passed = head.saturating_sub(proposal.block_last);
        let updated_conviction =
            match calculate_conviction(blocks_passed, &proposal.conviction_last, &proposal.staked_amount, &config.decay) {
                Ok(conviction) => conviction,
                Err(e) => {
                    warn!(proposal = %proposal.id, error = %e, "Using last checkpointed conviction");
                    proposal.conviction_last.clone()
                }
            };

        let threshold = if config.proposal_type.is_funding() {
            match calculate_threshold(
                &proposal.requested_amount,
                &strategy.pool_amount,
                config,
                &strategy.total_effective_active_points,
            ) {
                Ok(threshold) => threshold,
                Err(e) => {
                    debug!(proposal = %proposal.id, error = %e, "Threshold not computable, using indexed value");
                    proposal.threshold.clone()
                }
            }
        } else {
            proposal.threshold.clone()
        };

        let blocks_to_pass = remaining_blocks_to_pass(
            threshold.to_f64().unwrap_or(f64::INFINITY),
            updated_conviction.to_f64().unwrap_or(f64::INFINITY),
            proposal.staked_amount.to_f64().unwrap_or(f64::INFINITY),
            config.alpha(),
        );
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let time_to_pass = blocks_to_pass.map(|blocks| now + blocks * self.block_time_secs);

        ConvictionReport {
            threshold_pct: percentage_of(&threshold, &strategy.max_cv_supply, self.decimals),
            total_support_pct: percentage_of(
                &proposal.staked_amount,
                &strategy.total_effective_active_points,
                self.decimals,
            ),
            current_conviction_pct: percentage_of(&updated_conviction, &strategy.max_cv_supply, self.decimals),
            threshold,
            updated_conviction,
            block_number: head,
            blocks_to_pass,
            time_to_pass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, PointSystem, PoolType, ProposalStatus, D};

    struct FixedIndex(Option<ProposalSnapshot>);

    #[async_trait]
    impl IndexSource for FixedIndex {
        async fn proposal_snapshot(&self, proposal_id: &str) -> Result<ProposalSnapshot, IndexerError> {
            self.0.clone().ok_or_else(|| IndexerError::NotFound {
                kind: "proposal",
                id: proposal_id.to_string(),
            })
        }
    }

    struct Head(Result<u64, ()>);

    #[async_trait]
    impl ChainHead for Head {
        async fn block_number(&self) -> Result<u64, ChainError> {
            self.0.map_err(|_| ChainError::InvalidResponse("node down".into()))
        }
    }

    fn snapshot() -> ProposalSnapshot {
        let big = |v: u64| BigUint::from(v);
        ProposalSnapshot {
            proposal: Proposal {
                id: "s-1".into(),
                strategy: "s".into(),
                proposal_number: big(1),
                beneficiary: Address::ZERO,
                requested_token: Address::ZERO,
                requested_amount: big(0),
                staked_amount: big(100_000),
                threshold: big(250_000),
                max_cv_staked: big(0),
                block_last: 10,
                conviction_last: big(0),
                status: ProposalStatus::Active,
                submitter: Address::ZERO,
                metadata: String::new(),
                created_at: 0,
                updated_at: 0,
            },
            strategy: Strategy {
                id: "s".into(),
                address: Address::ZERO,
                pool_id: big(1),
                registry_community: Address::ZERO,
                config: "s-1-config".into(),
                token: None,
                pool_amount: big(0),
                max_cv_supply: big(1_000_000),
                total_effective_active_points: big(500_000),
                metadata: None,
            },
            config: StrategyConfig {
                id: "s-1-config".into(),
                strategy: "s".into(),
                decay: big(5_000_000),
                max_ratio: big(0),
                weight: big(0),
                min_threshold_points: big(0),
                proposal_type: PoolType::Signaling,
                point_system: PointSystem::Fixed,
                max_amount: big(0),
                d: D,
            },
        }
    }

    #[tokio::test]
    async fn test_report_percentages() {
        let reader = ConvictionReader::new(FixedIndex(Some(snapshot())), Head(Ok(10)));
        let report = reader.read("s-1").await.unwrap();
        assert_eq!(report.threshold_pct.unwrap().to_fixed(2), "25.00");
        assert_eq!(report.total_support_pct.unwrap().to_fixed(2), "20.00");
        assert_eq!(report.current_conviction_pct.unwrap().to_fixed(2), "0.00");
        assert_eq!(report.block_number, 10);
    }

    #[tokio::test]
    async fn test_conviction_advances_with_head() {
        let reader = ConvictionReader::new(FixedIndex(Some(snapshot())), Head(Ok(11)));
        let report = reader.read("s-1").await.unwrap();
        // One block at a = 0.5 from zero: 100_000 * (1 - 0.5) / 0.5
        assert_eq!(report.updated_conviction, BigUint::from(100_000u32));
        assert_eq!(report.current_conviction_pct.unwrap().to_fixed(1), "10.0");
        // Steady state 200_000 < 250_000
        assert_eq!(report.blocks_to_pass, None);
    }

    #[tokio::test]
    async fn test_failed_source_is_not_yet_available() {
        let reader = ConvictionReader::new(FixedIndex(Some(snapshot())), Head(Err(())));
        assert!(matches!(reader.read("s-1").await, Err(ConvictionError::NotYetAvailable(_))));

        let reader = ConvictionReader::new(FixedIndex(None), Head(Ok(1)));
        assert!(matches!(reader.read("s-1").await, Err(ConvictionError::NotYetAvailable(_))));
    }

    #[tokio::test]
    async fn test_empty_pool_yields_undefined_percentages() {
        let mut snap = snapshot();
        snap.strategy.max_cv_supply = BigUint::default();
        snap.strategy.total_effective_active_points = BigUint::default();
        let reader = ConvictionReader::new(FixedIndex(Some(snap)), Head(Ok(10)));
        let report = reader.read("s-1").await.unwrap();
        assert!(report.threshold_pct.is_none());
        assert!(report.total_support_pct.is_none());
        assert!(report.current_conviction_pct.is_none());
    }
}
