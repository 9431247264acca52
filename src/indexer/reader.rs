//! Contract reads performed while folding events
//!
//! Handlers that need more than the event payload re-read state from the
//! emitting contract. `None` means the call reverted.

use std::collections::BTreeMap;
use std::path::Path;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::model::{amount, proposal_id, Address};

/// Result of `getProposal` plus the metadata pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalState {
    pub submitter: Address,
    pub beneficiary: Address,
    pub requested_token: Address,
    #[serde(with = "amount")]
    pub requested_amount: BigUint,
    #[serde(with = "amount")]
    pub staked_amount: BigUint,
    /// Raw status code as stored by the contract
    pub status: u8,
    pub block_last: u64,
    #[serde(with = "amount")]
    pub conviction_last: BigUint,
    #[serde(with = "amount")]
    pub threshold: BigUint,
    /// Proposal metadata CID
    #[serde(default)]
    pub metadata: String,
}

/// Pool-level aggregates of a strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    #[serde(with = "amount", default)]
    pub pool_amount: BigUint,
    #[serde(with = "amount", default)]
    pub total_effective_active_points: BigUint,
    #[serde(default)]
    pub token: Option<Address>,
    /// Pool metadata CID
    #[serde(default)]
    pub metadata: Option<String>,
}

pub trait ContractReader {
    fn proposal(&self, strategy: &Address, proposal_id: &BigUint) -> Option<ProposalState>;

    fn strategy(&self, strategy: &Address) -> Option<StrategyState>;

    /// `owner()` of a collateral vault
    fn vault_owner(&self, vault: &Address) -> Option<Address>;
}

impl<T: ContractReader + ?Sized> ContractReader for Box<T> {
    fn proposal(&self, strategy: &Address, proposal_id: &BigUint) -> Option<ProposalState> {
        (**self).proposal(strategy, proposal_id)
    }

    fn strategy(&self, strategy: &Address) -> Option<StrategyState> {
        (**self).strategy(strategy)
    }

    fn vault_owner(&self, vault: &Address) -> Option<Address> {
        (**self).vault_owner(vault)
    }
}

/// Reader backed by recorded call results
///
/// Fixture layout:
///
/// ```json
/// {
///   "proposals": {"0x…-1": {"submitter": "0x…", "status": 1, …}},
///   "strategies": {"0x…": {"pool_amount": "1000", "total_effective_active_points": "500"}},
///   "vault_owners": {"0x…": "0x…"}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedReader {
    /// Keyed by proposal id (`{strategy}-{number}`)
    #[serde(default)]
    pub proposals: BTreeMap<String, ProposalState>,
    /// Keyed by strategy address
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyState>,
    #[serde(default)]
    pub vault_owners: BTreeMap<String, Address>,
}

impl RecordedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON fixture
    pub fn load(path: &Path) -> Result<Self, IndexerError> {
        let content = std::fs::read_to_string(path)?;
        let mut reader: RecordedReader = serde_json::from_str(&content)?;
        // Fixture keys may use mixed-case addresses
        reader.proposals = reader
            .proposals
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        reader.strategies = reader
            .strategies
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        reader.vault_owners = reader
            .vault_owners
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Ok(reader)
    }

    pub fn with_proposal(mut self, strategy: &Address, id: u64, state: ProposalState) -> Self {
        self.set_proposal(strategy, &BigUint::from(id), state);
        self
    }

    pub fn with_strategy(mut self, strategy: &Address, state: StrategyState) -> Self {
        self.set_strategy(strategy, state);
        self
    }

    pub fn with_vault_owner(mut self, vault: &Address, owner: Address) -> Self {
        self.vault_owners.insert(vault.to_string(), owner);
        self
    }

    pub fn set_proposal(&mut self, strategy: &Address, id: &BigUint, state: ProposalState) {
        self.proposals.insert(proposal_id(strategy, id), state);
    }

    pub fn set_strategy(&mut self, strategy: &Address, state: StrategyState) {
        self.strategies.insert(strategy.to_string(), state);
    }
}

impl ContractReader for RecordedReader {
    fn proposal(&self, strategy: &Address, proposal_id: &BigUint) -> Option<ProposalState> {
        self.proposals
            .get(&crate::model::proposal_id(strategy, proposal_id))
            .cloned()
    }

    fn strategy(&self, strategy: &Address) -> Option<StrategyState> {
        self.strategies.get(&strategy.to_string()).cloned()
    }

    fn vault_owner(&self, vault: &Address) -> Option<Address> {
        self.vault_owners.get(&vault.to_string()).copied()
    }
}
