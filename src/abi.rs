//! Static-tuple ABI decoding for strategy initialization payloads
//!
//! `InitializedCV` carries its parameters as raw ABI bytes. Only static
//! words are used, so decoding is a fixed walk over 32-byte slots:
//!
//! ```text
//! word 0  address  registryCommunity
//! word 1  uint256  decay
//! word 2  uint256  maxRatio
//! word 3  uint256  weight
//! word 4  uint256  minThresholdPoints
//! word 5  uint8    proposalType
//! word 6  uint8    pointSystem
//! word 7  uint256  maxAmount
//! ```

use num_bigint::BigUint;
use thiserror::Error;

use crate::model::{Address, PointSystem, PoolType, D};

const WORD: usize = 32;
const INIT_WORDS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbiError {
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("word {0} is not a left-padded address")]
    DirtyAddress(usize),

    #[error("word {index} out of range for {field}")]
    OutOfRange { index: usize, field: &'static str },
}

/// Decoded strategy initialization parameters
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeParams {
    pub registry_community: Address,
    pub decay: BigUint,
    pub max_ratio: BigUint,
    pub weight: BigUint,
    pub min_threshold_points: BigUint,
    pub proposal_type: PoolType,
    pub point_system: PointSystem,
    pub max_amount: BigUint,
}

impl InitializeParams {
    pub fn decode(data: &[u8]) -> Result<Self, AbiError> {
        let expected = INIT_WORDS * WORD;
        if data.len() < expected {
            return Err(AbiError::TooShort { expected, actual: data.len() });
        }

        let decay = uint(data, 1);
        if decay >= BigUint::from(D) {
            return Err(AbiError::OutOfRange { index: 1, field: "decay" });
        }

        let proposal_type = small(data, 5)
            .and_then(PoolType::from_code)
            .ok_or(AbiError::OutOfRange { index: 5, field: "proposalType" })?;
        let point_system = small(data, 6)
            .and_then(PointSystem::from_code)
            .ok_or(AbiError::OutOfRange { index: 6, field: "pointSystem" })?;

        Ok(Self {
            registry_community: address(data, 0)?,
            decay,
            max_ratio: uint(data, 2),
            weight: uint(data, 3),
            min_threshold_points: uint(data, 4),
            proposal_type,
            point_system,
            max_amount: uint(data, 7),
        })
    }

    /// Inverse of [`decode`](Self::decode), used to build fixtures.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INIT_WORDS * WORD);
        let mut addr = [0u8; WORD];
        addr[12..].copy_from_slice(self.registry_community.as_bytes());
        out.extend_from_slice(&addr);
        for value in [
            self.decay.clone(),
            self.max_ratio.clone(),
            self.weight.clone(),
            self.min_threshold_points.clone(),
            BigUint::from(self.proposal_type as u8),
            BigUint::from(self.point_system as u8),
            self.max_amount.clone(),
        ] {
            out.extend_from_slice(&encode_uint(&value));
        }
        out
    }
}

fn word(data: &[u8], index: usize) -> &[u8] {
    &data[index * WORD..(index + 1) * WORD]
}

fn uint(data: &[u8], index: usize) -> BigUint {
    BigUint::from_bytes_be(word(data, index))
}

fn small(data: &[u8], index: usize) -> Option<u8> {
    let w = word(data, index);
    if w[..WORD - 1].iter().any(|b| *b != 0) {
        return None;
    }
    Some(w[WORD - 1])
}

fn address(data: &[u8], index: usize) -> Result<Address, AbiError> {
    let w = word(data, index);
    if w[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::DirtyAddress(index));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&w[12..]);
    Ok(Address::from_bytes(bytes))
}

fn encode_uint(value: &BigUint) -> [u8; WORD] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; WORD];
    let len = bytes.len().min(WORD);
    out[WORD - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    out
}
