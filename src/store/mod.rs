//! Entity store
//!
//! Append/update key-value tables, one per entity type, with point lookups
//! by id and the relational lookups the query surface needs. The store is
//! mutated only by the indexer fold, one event at a time.

pub mod snapshot;

use std::collections::BTreeMap;

use crate::model::*;

pub use snapshot::SnapshotDb;

/// Typed table keyed by entity id
#[derive(Debug, Clone)]
pub struct Table<E: Entity> {
    rows: BTreeMap<String, E>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self { rows: BTreeMap::new() }
    }
}

impl<E: Entity> Table<E> {
    pub fn get(&self, id: &str) -> Option<&E> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Insert or replace by id
    pub fn save(&mut self, entity: E) {
        self.rows.insert(entity.id().to_string(), entity);
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// All indexed entities
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    pub strategies: Table<Strategy>,
    pub configs: Table<StrategyConfig>,
    pub proposals: Table<Proposal>,
    pub member_strategies: Table<MemberStrategy>,
    pub stakes: Table<Stake>,
    pub disputes: Table<ProposalDispute>,
    pub vaults: Table<CollateralVault>,
    pub deposits: Table<CollateralVaultDeposit>,
    pub sybil_protections: Table<SybilProtection>,
    pub sybil_users: Table<SybilUser>,
    pub sybil_strategies: Table<SybilStrategy>,
    pub proposal_metadata: Table<ProposalMetadata>,
    pub pool_metadata: Table<PoolMetadata>,
    pub covenants: Table<Covenant>,
    pub dispute_metadata: Table<ProposalDisputeMetadata>,
}

/// Row counts per table, for status reporting
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct StoreCounts {
    pub strategies: usize,
    pub proposals: usize,
    pub stakes: usize,
    pub disputes: usize,
    pub deposits: usize,
    pub sybil_users: usize,
    pub metadata: usize,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entity
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn strategy(&self, address: &Address) -> Option<&Strategy> {
        self.strategies.get(&address.to_string())
    }

    pub fn proposal(&self, id: &str) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Config of a strategy through its foreign key
    pub fn config_of(&self, strategy: &Strategy) -> Option<&StrategyConfig> {
        self.configs.get(&strategy.config)
    }

    /// Proposals of a strategy, ordered by proposal number
    pub fn proposals_of(&self, strategy_id: &str) -> Vec<&Proposal> {
        let mut proposals: Vec<&Proposal> = self
            .proposals
            .values()
            .filter(|p| p.strategy == strategy_id)
            .collect();
        proposals.sort_by(|a, b| a.proposal_number.cmp(&b.proposal_number));
        proposals
    }

    /// Stakes placed on a proposal
    pub fn stakes_of(&self, proposal_id: &str) -> Vec<&Stake> {
        self.stakes.values().filter(|s| s.proposal == proposal_id).collect()
    }

    /// Disputes raised against a proposal
    pub fn disputes_of(&self, proposal_id: &str) -> Vec<&ProposalDispute> {
        self.disputes.values().filter(|d| d.proposal == proposal_id).collect()
    }

    /// Deposits held by a vault
    pub fn deposits_of(&self, vault_id: &str) -> Vec<&CollateralVaultDeposit> {
        self.deposits
            .values()
            .filter(|d| d.collateral_vault == vault_id)
            .collect()
    }

    pub fn sybil_user(&self, kind: SybilKind, user: &Address) -> Option<&SybilUser> {
        self.sybil_users.get(&sybil_id(kind, user))
    }

    /// Whether a metadata entity of this kind exists for the CID
    pub fn has_metadata(&self, kind: MetadataKind, cid: &str) -> bool {
        match kind {
            MetadataKind::Proposal => self.proposal_metadata.contains(cid),
            MetadataKind::Pool => self.pool_metadata.contains(cid),
            MetadataKind::Covenant => self.covenants.contains(cid),
            MetadataKind::Dispute => self.dispute_metadata.contains(cid),
        }
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            strategies: self.strategies.len(),
            proposals: self.proposals.len(),
            stakes: self.stakes.len(),
            disputes: self.disputes.len(),
            deposits: self.deposits.len(),
            sybil_users: self.sybil_users.len(),
            metadata: self.proposal_metadata.len()
                + self.pool_metadata.len()
                + self.covenants.len()
                + self.dispute_metadata.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn proposal(strategy: &str, number: u32) -> Proposal {
        Proposal {
            id: format!("{}-{}", strategy, number),
            strategy: strategy.to_string(),
            proposal_number: BigUint::from(number),
            beneficiary: Address::ZERO,
            requested_token: Address::ZERO,
            requested_amount: BigUint::default(),
            staked_amount: BigUint::default(),
            threshold: BigUint::default(),
            max_cv_staked: BigUint::default(),
            block_last: 0,
            conviction_last: BigUint::default(),
            status: ProposalStatus::Active,
            submitter: Address::ZERO,
            metadata: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_save_replaces_by_id() {
        let mut store = EntityStore::new();
        let mut p = proposal("s1", 1);
        store.proposals.save(p.clone());
        p.staked_amount = BigUint::from(5u32);
        store.proposals.save(p);
        assert_eq!(store.proposals.len(), 1);
        assert_eq!(store.proposal("s1-1").unwrap().staked_amount, BigUint::from(5u32));
    }

    #[test]
    fn test_proposals_of_filters_and_orders() {
        let mut store = EntityStore::new();
        store.proposals.save(proposal("s1", 10));
        store.proposals.save(proposal("s2", 1));
        store.proposals.save(proposal("s1", 2));

        let numbers: Vec<String> = store
            .proposals_of("s1")
            .iter()
            .map(|p| p.proposal_number.to_string())
            .collect();
        assert_eq!(numbers, vec!["2", "10"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = EntityStore::new();
        store.proposals.save(proposal("s1", 1));
        store.reset();
        assert_eq!(store.counts(), StoreCounts::default());
    }
}
