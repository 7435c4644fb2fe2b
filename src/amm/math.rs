//! Constant-product AMM math.
//!
//! Pure, deterministic functions over reserves and amounts; no network calls.
//! All arithmetic is checked, with `U512` intermediates where products of two
//! 256-bit values could overflow. Each protocol supplies its own
//! `FeeSchedule`; nothing here assumes a universal fee.

use crate::errors::AmmError;
use crate::types::FeeSchedule;
use ethers::types::{U256, U512};

const BPS_DENOMINATOR: u64 = 10_000;

/// Output amount for an exact-input swap:
///
/// `floor(amountIn * feeNum * reserveOut / (reserveIn * feeDen + amountIn * feeNum))`
///
/// Fails with `InsufficientLiquidity` when either reserve is zero or the
/// computed output rounds to zero.
pub fn get_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeSchedule,
) -> Result<U256, AmmError> {
    fee.validate()?;
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(AmmError::InsufficientLiquidity);
    }
    if amount_in.is_zero() {
        return Err(AmmError::InsufficientLiquidity);
    }

    let amount_in_with_fee = U512::from(amount_in) * U512::from(fee.numerator);
    let numerator = amount_in_with_fee
        .checked_mul(U512::from(reserve_out))
        .ok_or(AmmError::Overflow("amount_out numerator"))?;
    let denominator = U512::from(reserve_in)
        .checked_mul(U512::from(fee.denominator))
        .ok_or(AmmError::Overflow("amount_out denominator"))?
        .checked_add(amount_in_with_fee)
        .ok_or(AmmError::Overflow("amount_out denominator"))?;
    if denominator.is_zero() {
        return Err(AmmError::DivisionByZero("amount_out"));
    }

    let amount_out = numerator / denominator;
    let amount_out = u512_to_u256(amount_out, "amount_out")?;
    if amount_out.is_zero() {
        return Err(AmmError::InsufficientLiquidity);
    }
    Ok(amount_out)
}

/// Input amount required for an exact-output swap, rounded up by one so the
/// invariant holds after fees:
///
/// `floor(reserveIn * amountOut * feeDen / ((reserveOut - amountOut) * feeNum)) + 1`
pub fn get_amount_in(
    amount_out: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeSchedule,
) -> Result<U256, AmmError> {
    fee.validate()?;
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(AmmError::InsufficientLiquidity);
    }
    if amount_out >= reserve_out {
        return Err(AmmError::ExcessiveOutput {
            amount_out: amount_out.to_string(),
            reserve_out: reserve_out.to_string(),
        });
    }

    let numerator = U512::from(reserve_in)
        .checked_mul(U512::from(amount_out))
        .ok_or(AmmError::Overflow("amount_in numerator"))?
        .checked_mul(U512::from(fee.denominator))
        .ok_or(AmmError::Overflow("amount_in numerator"))?;
    let denominator = U512::from(reserve_out - amount_out)
        .checked_mul(U512::from(fee.numerator))
        .ok_or(AmmError::Overflow("amount_in denominator"))?;
    if denominator.is_zero() {
        return Err(AmmError::DivisionByZero("amount_in"));
    }

    let amount_in = numerator / denominator + U512::one();
    u512_to_u256(amount_in, "amount_in")
}

/// Minimum acceptable output after applying a slippage tolerance:
/// `floor(amountOut * (10000 - slippageBps) / 10000)`.
pub fn apply_slippage(amount_out: U256, slippage_bps: u32) -> U256 {
    let slippage_bps = u64::from(slippage_bps).min(BPS_DENOMINATOR);
    let keep = U256::from(BPS_DENOMINATOR - slippage_bps);
    amount_out
        .checked_mul(keep)
        .map(|v| v / U256::from(BPS_DENOMINATOR))
        // Fall back to wide math only when amountOut * 10^4 overflows 256 bits.
        .unwrap_or_else(|| {
            let wide = U512::from(amount_out) * U512::from(keep) / U512::from(BPS_DENOMINATOR);
            u512_to_u256(wide, "slippage").unwrap_or(U256::MAX)
        })
}

fn u512_to_u256(value: U512, context: &'static str) -> Result<U256, AmmError> {
    if value > U512::from(U256::MAX) {
        return Err(AmmError::Overflow(context));
    }
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    Ok(U256::from_big_endian(&bytes[32..]))
}
