//! Indexed contract events
//!
//! One closed union per emitting contract, each variant carrying its
//! decoded parameters. Replay input is JSON lines of [`LogEvent`]:
//!
//! ```json
//! {"address":"0x…","block_number":10,"block_timestamp":1700000000,"log_index":0,
//!  "event":{"contract":"CollateralVault",
//!           "event":{"name":"CollateralDeposited","proposal_id":"1","user":"0x…","amount":"100"}}}
//! ```

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{amount, Address};

/// A log emitted by a contract, in block order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Emitting contract
    pub address: Address,
    pub block_number: u64,
    /// Block timestamp (unix seconds)
    pub block_timestamp: u64,
    #[serde(default)]
    pub log_index: u32,
    pub event: ChainEvent,
}

impl LogEvent {
    /// Position used for ordering checks
    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contract", content = "event")]
pub enum ChainEvent {
    CvStrategy(CvStrategyEvent),
    CollateralVault(CollateralVaultEvent),
    PassportScorer(PassportEvent),
    GoodDollarSybil(GoodDollarEvent),
    RegistryCommunity(CommunityEvent),
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::CvStrategy(e) => match e {
                CvStrategyEvent::InitializedCV { .. } => "InitializedCV",
                CvStrategyEvent::ProposalCreated { .. } => "ProposalCreated",
                CvStrategyEvent::SupportAdded { .. } => "SupportAdded",
                CvStrategyEvent::PoolAmountIncreased { .. } => "PoolAmountIncreased",
                CvStrategyEvent::PowerIncreased { .. } => "PowerIncreased",
                CvStrategyEvent::PowerDecreased { .. } => "PowerDecreased",
                CvStrategyEvent::PointsDeactivated { .. } => "PointsDeactivated",
                CvStrategyEvent::Distributed { .. } => "Distributed",
                CvStrategyEvent::ProposalDisputed { .. } => "ProposalDisputed",
                CvStrategyEvent::Ruling { .. } => "Ruling",
                CvStrategyEvent::ProposalCancelled { .. } => "ProposalCancelled",
            },
            ChainEvent::CollateralVault(e) => match e {
                CollateralVaultEvent::CollateralDeposited { .. } => "CollateralDeposited",
                CollateralVaultEvent::CollateralWithdrawn { .. } => "CollateralWithdrawn",
                CollateralVaultEvent::CollateralWithdrawnFor { .. } => "CollateralWithdrawnFor",
            },
            ChainEvent::PassportScorer(e) => match e {
                PassportEvent::Initialized => "Initialized",
                PassportEvent::UserScoreAdded { .. } => "UserScoreAdded",
                PassportEvent::UserRemoved { .. } => "UserRemoved",
                PassportEvent::StrategyAdded { .. } => "StrategyAdded",
                PassportEvent::StrategyRemoved { .. } => "StrategyRemoved",
                PassportEvent::StrategyActivated { .. } => "StrategyActivated",
                PassportEvent::ThresholdModified { .. } => "ThresholdModified",
            },
            ChainEvent::GoodDollarSybil(e) => match e {
                GoodDollarEvent::Initialized => "Initialized",
                GoodDollarEvent::UserValidated { .. } => "UserValidated",
                GoodDollarEvent::UserInvalidated { .. } => "UserInvalidated",
                GoodDollarEvent::GoodDollarStrategyAdded { .. } => "GoodDollarStrategyAdded",
            },
            ChainEvent::RegistryCommunity(e) => match e {
                CommunityEvent::CovenantIpfsHashUpdated { .. } => "CovenantIpfsHashUpdated",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum CvStrategyEvent {
    InitializedCV {
        #[serde(with = "amount")]
        pool_id: BigUint,
        /// ABI-encoded initialization tuple
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    ProposalCreated {
        #[serde(with = "amount")]
        pool_id: BigUint,
        #[serde(with = "amount")]
        proposal_id: BigUint,
    },
    SupportAdded {
        from: Address,
        #[serde(with = "amount")]
        proposal_id: BigUint,
        #[serde(with = "amount")]
        amount: BigUint,
        #[serde(with = "amount")]
        total_staked_amount: BigUint,
        #[serde(with = "amount")]
        conviction_last: BigUint,
    },
    PoolAmountIncreased {
        #[serde(with = "amount")]
        amount: BigUint,
    },
    PowerIncreased {
        member: Address,
        #[serde(with = "amount")]
        points_to_increase: BigUint,
    },
    PowerDecreased {
        member: Address,
        #[serde(with = "amount")]
        points_to_decrease: BigUint,
    },
    /// Member left the pool; all of their stakes in it are withdrawn
    PointsDeactivated { member: Address },
    Distributed {
        #[serde(with = "amount")]
        proposal_id: BigUint,
        beneficiary: Address,
        #[serde(with = "amount")]
        amount: BigUint,
    },
    ProposalDisputed {
        arbitrator: Address,
        #[serde(with = "amount")]
        proposal_id: BigUint,
        #[serde(with = "amount")]
        dispute_id: BigUint,
        challenger: Address,
        /// Dispute metadata CID
        context: String,
    },
    Ruling {
        arbitrator: Address,
        #[serde(with = "amount")]
        dispute_id: BigUint,
        #[serde(with = "amount")]
        ruling: BigUint,
    },
    ProposalCancelled {
        #[serde(with = "amount")]
        proposal_id: BigUint,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum CollateralVaultEvent {
    CollateralDeposited {
        #[serde(with = "amount")]
        proposal_id: BigUint,
        user: Address,
        #[serde(with = "amount")]
        amount: BigUint,
    },
    CollateralWithdrawn {
        #[serde(with = "amount")]
        proposal_id: BigUint,
        user: Address,
        #[serde(with = "amount")]
        amount: BigUint,
        #[serde(default)]
        is_insufficient_available_amount: bool,
    },
    CollateralWithdrawnFor {
        #[serde(with = "amount")]
        proposal_id: BigUint,
        from_user: Address,
        to_user: Address,
        #[serde(with = "amount")]
        amount: BigUint,
        #[serde(default)]
        is_insufficient_available_amount: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum PassportEvent {
    Initialized,
    UserScoreAdded {
        user: Address,
        #[serde(with = "amount")]
        score: BigUint,
    },
    UserRemoved {
        user: Address,
    },
    StrategyAdded {
        strategy: Address,
        #[serde(with = "amount")]
        threshold: BigUint,
        council_safe: Address,
    },
    StrategyRemoved {
        strategy: Address,
    },
    StrategyActivated {
        strategy: Address,
    },
    ThresholdModified {
        strategy: Address,
        #[serde(with = "amount")]
        new_threshold: BigUint,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum GoodDollarEvent {
    Initialized,
    UserValidated { user: Address },
    UserInvalidated { user: Address },
    GoodDollarStrategyAdded { strategy: Address, council_safe: Address },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum CommunityEvent {
    CovenantIpfsHashUpdated { covenant_ipfs_hash: String },
}

/// A replay line that did not decode into a [`LogEvent`]
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid event on line {line}: {reason}")]
pub struct RejectedLine {
    /// 1-based line number in the log
    pub line: usize,
    /// Position fields, when the line is at least a JSON object carrying them
    pub block_number: Option<u64>,
    pub log_index: Option<u32>,
    pub reason: String,
}

/// One entry of a parsed replay log
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    Event(LogEvent),
    Rejected(RejectedLine),
}

/// Parse a JSON-lines event log. Blank lines and `#` comments are skipped.
///
/// A line that fails to decode does not stop the parse; it is returned as
/// [`LogLine::Rejected`] in its place so the fold can record it and move on.
pub fn parse_event_log(content: &str) -> Vec<LogLine> {
    let mut lines = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<LogEvent>(line) {
            Ok(event) => lines.push(LogLine::Event(event)),
            Err(e) => {
                let raw: Option<Value> = serde_json::from_str(line).ok();
                let field = |name: &str| raw.as_ref().and_then(|v| v.get(name)).and_then(Value::as_u64);
                lines.push(LogLine::Rejected(RejectedLine {
                    line: index + 1,
                    block_number: field("block_number"),
                    log_index: field("log_index").and_then(|i| u32::try_from(i).ok()),
                    reason: e.to_string(),
                }));
            }
        }
    }
    lines
}

/// `0x`-prefixed hex encoding for raw payload bytes
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}
