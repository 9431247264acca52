//! Indexed entities
//!
//! Every entity is keyed by a string id derived from on-chain identifiers
//! (contract address, proposal number, member address, CID). The store owns
//! all of them; nothing outside it holds authoritative state.

pub mod address;
pub mod amount;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use address::Address;

/// Fixed-point scale used by the conviction-voting contracts (1.0 == D).
pub const D: u64 = 10_000_000;

/// Common surface of every stored entity.
pub trait Entity: Serialize + serde::de::DeserializeOwned + Clone {
    /// Table name used for persistence and error messages
    const KIND: &'static str;

    fn id(&self) -> &str;
}

macro_rules! entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

// ============================================================================
// Enums
// ============================================================================

/// Pool type of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Signaling,
    Funding,
    Streaming,
}

impl PoolType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PoolType::Signaling),
            1 => Some(PoolType::Funding),
            2 => Some(PoolType::Streaming),
            _ => None,
        }
    }

    pub fn is_funding(&self) -> bool {
        matches!(self, PoolType::Funding | PoolType::Streaming)
    }
}

/// How member voting points are derived from staked tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointSystem {
    Fixed,
    Capped,
    Unlimited,
    Quadratic,
}

impl PointSystem {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PointSystem::Fixed),
            1 => Some(PointSystem::Capped),
            2 => Some(PointSystem::Unlimited),
            3 => Some(PointSystem::Quadratic),
            _ => None,
        }
    }
}

/// Proposal lifecycle, encoded as the contract does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Inactive,
    Active,
    Paused,
    Cancelled,
    Executed,
    Disputed,
    Rejected,
}

impl ProposalStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ProposalStatus::Inactive),
            1 => Some(ProposalStatus::Active),
            2 => Some(ProposalStatus::Paused),
            3 => Some(ProposalStatus::Cancelled),
            4 => Some(ProposalStatus::Executed),
            5 => Some(ProposalStatus::Disputed),
            6 => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Cancelled | ProposalStatus::Executed | ProposalStatus::Rejected
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Staying in the same status is always allowed (re-reads are common).
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Inactive => matches!(next, Active | Cancelled),
            Active => matches!(next, Paused | Disputed | Cancelled | Executed),
            Paused => matches!(next, Active | Cancelled),
            Disputed => matches!(next, Active | Cancelled | Rejected),
            Cancelled | Executed | Rejected => false,
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Inactive => "inactive",
            ProposalStatus::Active => "active",
            ProposalStatus::Paused => "paused",
            ProposalStatus::Cancelled => "cancelled",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Disputed => "disputed",
            ProposalStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Dispute state on the arbitrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Waiting,
    Solved,
}

/// Sybil-resistance provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SybilKind {
    Passport,
    GoodDollar,
}

impl SybilKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SybilKind::Passport => "passport",
            SybilKind::GoodDollar => "good_dollar",
        }
    }
}

impl std::str::FromStr for SybilKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passport" => Ok(SybilKind::Passport),
            "good_dollar" | "gooddollar" => Ok(SybilKind::GoodDollar),
            other => Err(format!("unknown sybil provider: {}", other)),
        }
    }
}

/// Which metadata entity a CID resolves into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Proposal,
    Pool,
    Covenant,
    Dispute,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::Proposal => "proposal",
            MetadataKind::Pool => "pool",
            MetadataKind::Covenant => "covenant",
            MetadataKind::Dispute => "dispute",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "proposal" => Some(MetadataKind::Proposal),
            "pool" => Some(MetadataKind::Pool),
            "covenant" => Some(MetadataKind::Covenant),
            "dispute" => Some(MetadataKind::Dispute),
            _ => None,
        }
    }
}

// ============================================================================
// Ids
// ============================================================================

pub fn proposal_id(strategy: &Address, number: &BigUint) -> String {
    format!("{}-{}", strategy, number)
}

pub fn config_id(strategy: &Address, pool_id: &BigUint) -> String {
    format!("{}-{}-config", strategy, pool_id)
}

pub fn member_strategy_id(member: &Address, strategy: &Address) -> String {
    format!("{}-{}", member, strategy)
}

pub fn stake_id(proposal_id: &str, member: &Address, strategy: &Address) -> String {
    format!("{}-{}", proposal_id, member_strategy_id(member, strategy))
}

pub fn dispute_id(arbitrator: &Address, dispute: &BigUint) -> String {
    format!("{}_{}", arbitrator, dispute)
}

pub fn deposit_id(vault: &Address, proposal: &BigUint, user: &Address) -> String {
    format!("{}-{}-{}", vault, proposal, user)
}

pub fn sybil_id(kind: SybilKind, address: &Address) -> String {
    format!("{}-{}", kind.as_str(), address)
}

// ============================================================================
// Conviction-voting entities
// ============================================================================

/// One conviction-voting pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub address: Address,
    #[serde(with = "amount")]
    pub pool_id: BigUint,
    pub registry_community: Address,
    pub config: String,
    pub token: Option<Address>,
    #[serde(with = "amount")]
    pub pool_amount: BigUint,
    #[serde(with = "amount")]
    pub max_cv_supply: BigUint,
    #[serde(with = "amount")]
    pub total_effective_active_points: BigUint,
    /// Pool metadata CID
    pub metadata: Option<String>,
}
entity!(Strategy, "strategy");

/// Immutable conviction parameters of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub strategy: String,
    #[serde(with = "amount")]
    pub decay: BigUint,
    #[serde(with = "amount")]
    pub max_ratio: BigUint,
    #[serde(with = "amount")]
    pub weight: BigUint,
    #[serde(with = "amount")]
    pub min_threshold_points: BigUint,
    pub proposal_type: PoolType,
    pub point_system: PointSystem,
    #[serde(with = "amount")]
    pub max_amount: BigUint,
    pub d: u64,
}
entity!(StrategyConfig, "strategy_config");

impl StrategyConfig {
    /// Decay as a per-block retention factor in [0, 1)
    pub fn alpha(&self) -> f64 {
        crate::conviction::ratio_f64(&self.decay, &BigUint::from(self.d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub strategy: String,
    #[serde(with = "amount")]
    pub proposal_number: BigUint,
    pub beneficiary: Address,
    pub requested_token: Address,
    #[serde(with = "amount")]
    pub requested_amount: BigUint,
    #[serde(with = "amount")]
    pub staked_amount: BigUint,
    #[serde(with = "amount")]
    pub threshold: BigUint,
    #[serde(with = "amount")]
    pub max_cv_staked: BigUint,
    pub block_last: u64,
    #[serde(with = "amount")]
    pub conviction_last: BigUint,
    pub status: ProposalStatus,
    pub submitter: Address,
    /// Proposal metadata CID
    pub metadata: String,
    pub created_at: u64,
    pub updated_at: u64,
}
entity!(Proposal, "proposal");

/// Points a member has activated and staked in one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStrategy {
    pub id: String,
    pub member: Address,
    pub strategy: String,
    #[serde(with = "amount")]
    pub activated_points: BigUint,
    #[serde(with = "amount")]
    pub total_staked_points: BigUint,
}
entity!(MemberStrategy, "member_strategy");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    pub id: String,
    pub member: Address,
    pub proposal: String,
    #[serde(with = "amount")]
    pub pool_id: BigUint,
    #[serde(with = "amount")]
    pub amount: BigUint,
    pub created_at: u64,
}
entity!(Stake, "stake");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDispute {
    pub id: String,
    #[serde(with = "amount")]
    pub dispute_id: BigUint,
    pub proposal: String,
    pub challenger: Address,
    /// Dispute metadata CID
    pub context: String,
    pub status: DisputeStatus,
    #[serde(with = "amount::option", default)]
    pub ruling_outcome: Option<BigUint>,
    pub created_at: u64,
    pub ruled_at: Option<u64>,
}
entity!(ProposalDispute, "proposal_dispute");

// ============================================================================
// Collateral
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralVault {
    pub id: String,
    pub strategy: Option<Address>,
}
entity!(CollateralVault, "collateral_vault");

/// Collateral held for one (vault, proposal, depositor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralVaultDeposit {
    pub id: String,
    pub collateral_vault: String,
    #[serde(with = "amount")]
    pub proposal_id: BigUint,
    pub depositor: Address,
    #[serde(with = "amount")]
    pub amount: BigUint,
    pub created_at: u64,
    pub withdrawn_at: Option<u64>,
    pub withdrawn_to: Option<Address>,
    /// Set once a withdrawal asked for more than was available
    #[serde(default)]
    pub insufficient_available_amount: bool,
}
entity!(CollateralVaultDeposit, "collateral_vault_deposit");

// ============================================================================
// Sybil resistance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SybilProtection {
    pub id: String,
    pub kind: SybilKind,
}
entity!(SybilProtection, "sybil_protection");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SybilUser {
    pub id: String,
    pub kind: SybilKind,
    pub user_address: Address,
    #[serde(with = "amount")]
    pub score: BigUint,
    pub verified: bool,
    pub last_updated: u64,
    pub provider: String,
}
entity!(SybilUser, "sybil_user");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SybilStrategy {
    pub id: String,
    pub kind: SybilKind,
    pub strategy: Address,
    pub provider: String,
    #[serde(with = "amount")]
    pub threshold: BigUint,
    pub council_safe: Option<Address>,
    pub active: bool,
}
entity!(SybilStrategy, "sybil_strategy");

// ============================================================================
// Content-addressed metadata (id = CID)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalMetadata {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}
entity!(ProposalMetadata, "proposal_metadata");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}
entity!(PoolMetadata, "pool_metadata");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covenant {
    pub id: String,
    pub text: Option<String>,
}
entity!(Covenant, "covenant");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDisputeMetadata {
    pub id: String,
    pub reason: Option<String>,
}
entity!(ProposalDisputeMetadata, "proposal_dispute_metadata");
