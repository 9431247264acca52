//! Serde helpers for on-chain integers
//!
//! Amounts are `BigUint` serialized as decimal strings. Input accepts
//! decimal strings, `0x` hex strings and plain JSON integers.

use num_bigint::BigUint;
use num_traits::Num;
use serde::{de, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Text(String),
    Number(u64),
}

/// Parse a decimal or `0x` hex integer.
pub fn parse(s: &str) -> Option<BigUint> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Some(BigUint::default());
        }
        BigUint::from_str_radix(hex, 16).ok()
    } else {
        BigUint::from_str_radix(s, 10).ok()
    }
}

/// `a - b`, floored at zero
pub fn saturating_sub(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        BigUint::default()
    }
}

fn from_raw<E: de::Error>(raw: Raw) -> Result<BigUint, E> {
    match raw {
        Raw::Number(n) => Ok(BigUint::from(n)),
        Raw::Text(s) => parse(&s).ok_or_else(|| E::custom(format!("invalid integer: {}", s))),
    }
}

pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    from_raw(Raw::deserialize(deserializer)?)
}

/// Same encoding for `Option<BigUint>`; `null` maps to `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            Some(raw) => from_raw(raw).map(Some),
            None => Ok(None),
        }
    }
}
