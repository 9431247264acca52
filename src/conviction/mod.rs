//! Conviction-voting arithmetic
//!
//! Pure functions over on-chain integers. Conviction and threshold follow
//! the strategy contract bit for bit (128-bit and 64-bit fixed point), so
//! values computed here match what `calculateProposalConviction` and
//! `calculateThreshold` would return for the same inputs.

pub mod reader;

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use thiserror::Error;

use crate::model::{StrategyConfig, D};

pub use reader::{ChainHead, ConvictionReader, ConvictionReport, IndexSource, ProposalSnapshot};

/// Token decimals assumed when none are known
pub const DEFAULT_PRECISION_DECIMALS: u32 = 18;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvictionError {
    #[error("not yet available: {0}")]
    NotYetAvailable(String),

    #[error("pool has no funds")]
    EmptyPool,

    #[error("requested amount exceeds the pool's max ratio")]
    AmountOverMaxRatio,

    #[error("decay {0} must be below the 10^7 scale")]
    InvalidDecay(BigUint),
}

/// A ratio kept as an integer scaled by `10^decimals`.
///
/// Ordering compares the scaled ratio and is only meaningful between
/// percentages built with the same decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Percentage {
    ratio_scaled: BigUint,
    decimals: u32,
}

impl Percentage {
    /// `ratio * 10^decimals`, truncated
    pub fn ratio_scaled(&self) -> &BigUint {
        &self.ratio_scaled
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Percentage rendered with `digits` decimal places, rounding half up.
    pub fn to_fixed(&self, digits: u32) -> String {
        let scale = pow10(self.decimals);
        let half = &scale >> 1u32;
        let value = (&self.ratio_scaled * 100u32 * pow10(digits) + half) / &scale;

        if digits == 0 {
            return value.to_string();
        }
        let unit = pow10(digits);
        let whole = &value / &unit;
        let frac = (&value % &unit).to_string();
        format!("{}.{}{}", whole, "0".repeat(digits as usize - frac.len()), frac)
    }

    /// Percentage as a float (100.0 == whole)
    pub fn as_f64(&self) -> f64 {
        ratio_f64(&self.ratio_scaled, &pow10(self.decimals)) * 100.0
    }
}

impl PartialOrd for Percentage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Percentage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ratio_scaled.cmp(&other.ratio_scaled)
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.to_fixed(2))
    }
}

/// `numerator / denominator` as a percentage, keeping `decimals` digits of
/// the ratio. `None` when the denominator is zero.
pub fn percentage_of(numerator: &BigUint, denominator: &BigUint, decimals: u32) -> Option<Percentage> {
    if denominator.is_zero() {
        return None;
    }
    Some(Percentage {
        ratio_scaled: numerator * pow10(decimals) / denominator,
        decimals,
    })
}

/// Float ratio of two big integers; 0 when the denominator is zero.
pub fn ratio_f64(numerator: &BigUint, denominator: &BigUint) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    // Drop low bits so both sides stay within f64 range
    let shift = denominator.bits().max(numerator.bits()).saturating_sub(1000);
    let n = (numerator >> shift).to_f64().unwrap_or(f64::MAX);
    let d = (denominator >> shift).to_f64().unwrap_or(f64::MAX);
    if d == 0.0 {
        return 0.0;
    }
    n / d
}

/// Steady-state conviction of `amount`: `amount * D / (D - decay)`.
pub fn max_conviction(amount: &BigUint, decay: &BigUint) -> Option<BigUint> {
    let d = BigUint::from(D);
    if decay >= &d {
        return None;
    }
    Some(amount * &d / (d - decay))
}

fn two_pow(bits: u32) -> BigUint {
    BigUint::one() << bits
}

fn pow10(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}

/// Fixed-point multiply with 128 fractional bits, rounding to nearest.
fn mul_128(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b + two_pow(127)) >> 128u32
}

/// `a^b` with `a` in 128-bit fixed point, by square-and-multiply.
fn pow_128(a: &BigUint, mut b: u64) -> BigUint {
    let mut base = a.clone();
    let mut result = two_pow(128);
    while b > 0 {
        if b & 1 == 0 {
            base = mul_128(&base, &base);
            b >>= 1;
        } else {
            result = mul_128(&result, &base);
            b -= 1;
        }
    }
    result
}

/// Conviction after `blocks_passed` blocks with constant stake.
///
/// `y(t) = a^t * y0 + x * D * (1 - a^t) / (D - decay)` with `a = decay / D`,
/// evaluated in 128-bit fixed point the way the contract does.
pub fn calculate_conviction(
    blocks_passed: u64,
    conviction_last: &BigUint,
    staked: &BigUint,
    decay: &BigUint,
) -> Result<BigUint, ConvictionError> {
    let d = BigUint::from(D);
    if decay >= &d {
        return Err(ConvictionError::InvalidDecay(decay.clone()));
    }
    let two_128 = two_pow(128);
    let a = (decay << 128u32) / &d;
    let at = pow_128(&a, blocks_passed);

    let decayed = &at * conviction_last;
    let growth = staked * &d * (&two_128 - &at) / (&d - decay);
    Ok((decayed + growth + two_pow(127)) >> 128u32)
}

/// Conviction a proposal requesting `requested` needs to pass.
///
/// Uses 64-bit fixed point like the contract and is floored at the
/// config's `min_threshold_points`.
pub fn calculate_threshold(
    requested: &BigUint,
    pool_amount: &BigUint,
    config: &StrategyConfig,
    total_effective_active_points: &BigUint,
) -> Result<BigUint, ConvictionError> {
    let d = BigUint::from(D);
    if pool_amount.is_zero() {
        return Err(ConvictionError::EmptyPool);
    }
    if config.decay >= d {
        return Err(ConvictionError::InvalidDecay(config.decay.clone()));
    }
    if requested * &d >= &config.max_ratio * pool_amount {
        return Err(ConvictionError::AmountOverMaxRatio);
    }

    let two_64 = two_pow(64);
    let max_ratio_64 = &config.max_ratio * &two_64 / &d;
    let requested_64 = requested * &two_64 / pool_amount;
    if requested_64 >= max_ratio_64 {
        return Err(ConvictionError::AmountOverMaxRatio);
    }
    let denom = max_ratio_64 - requested_64;
    let denom_sq = (&denom * &denom) >> 64u32;
    if denom_sq.is_zero() {
        return Err(ConvictionError::AmountOverMaxRatio);
    }

    let weight_128 = (&config.weight << 128u32) / &d;
    let threshold =
        ((weight_128 / denom_sq) * &d / (&d - &config.decay) * total_effective_active_points) >> 64u32;

    Ok(threshold.max(config.min_threshold_points.clone()))
}

/// Blocks until conviction reaches `threshold` with constant stake.
///
/// Solves `y(t) = threshold` for `t`:
/// `t = ln(((α-1)·y + x) / ((α-1)·y0 + x)) / ln(α)`, rounded up.
/// `Some(0)` when already passed, `None` when the stake can never get there.
pub fn remaining_blocks_to_pass(threshold: f64, conviction: f64, staked: f64, alpha: f64) -> Option<u64> {
    if !threshold.is_finite() || !conviction.is_finite() || !staked.is_finite() {
        return None;
    }
    if conviction >= threshold {
        return Some(0);
    }
    if !(0.0..1.0).contains(&alpha) || staked <= 0.0 {
        return None;
    }
    if alpha == 0.0 {
        return if staked >= threshold { Some(1) } else { None };
    }

    let target = (alpha - 1.0) * threshold + staked;
    let current = (alpha - 1.0) * conviction + staked;
    if target <= 0.0 || current <= 0.0 {
        return None;
    }
    let blocks = (target / current).ln() / alpha.ln();
    if !blocks.is_finite() || blocks < 0.0 {
        return None;
    }
    Some(blocks.ceil() as u64)
}
