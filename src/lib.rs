//! gardens-indexer: event indexer and conviction reader for Gardens pools
//!
//! Folds a block-ordered log of conviction-voting, collateral vault and
//! sybil-protection events into an entity store, resolves the IPFS
//! metadata those entities point at, and derives display percentages
//! from the indexed state plus the live chain head.

pub mod abi;
pub mod api;
pub mod chain;
pub mod config;
pub mod conviction;
pub mod error;
pub mod events;
pub mod indexer;
pub mod ipfs;
pub mod model;
pub mod store;

pub use error::IndexerError;
