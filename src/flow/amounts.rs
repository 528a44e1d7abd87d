//! Conversions between human-readable token amounts and on-chain integers.
//!
//! Amounts cross the tool boundary as decimal strings ("1.5") and reach the contracts
//! as `U256` in the token's smallest unit. All arithmetic is done on `U256` or
//! `rust_decimal::Decimal`, never on floats.

use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::{FlowError, FlowResult};

/// Parts-per-million denominator for slippage math.
const PPM: u64 = 1_000_000;

/// Parse a human-readable amount (e.g. "1.5") into the token's smallest unit.
///
/// Fraction digits beyond `decimals` are truncated.
///
/// # Errors
/// `FlowError::Validation` when the amount is malformed, zero, negative, or rounds down
/// to zero in the token's smallest unit.
pub fn parse_amount(amount: &str, decimals: u8) -> FlowResult<U256> {
    let amount = amount.trim();
    let value = Decimal::from_str(amount)
        .map_err(|_| FlowError::Validation(format!("invalid amount: {amount:?}")))?;

    if value.is_zero() || value.is_sign_negative() {
        return Err(FlowError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }

    let normalized = value.normalize().to_string();
    let (whole, fraction) = normalized
        .split_once('.')
        .unwrap_or((normalized.as_str(), ""));
    let fraction: String = fraction.chars().take(decimals as usize).collect();
    let digits = format!("{whole}{fraction:0<width$}", width = decimals as usize);
    let digits = digits.trim_start_matches('0');

    if digits.is_empty() {
        return Err(FlowError::Validation(format!(
            "amount {amount} is below the smallest unit of a {decimals}-decimal token"
        )));
    }

    U256::from_str(digits)
        .map_err(|e| FlowError::Validation(format!("amount {amount} out of range: {e}")))
}

/// Format balance from smallest unit to human-readable format, trailing zeros removed.
pub fn format_balance(balance: U256, decimals: u8) -> String {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = balance / divisor;
    let remainder = balance % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_part = remainder.to_string();
        let padded = format!("{:0>width$}", decimal_part, width = decimals as usize);
        let trimmed = padded.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{whole}.{trimmed}")
        }
    }
}

/// Convert U256 to Decimal with proper decimal scaling
pub fn u256_to_decimal(value: U256, decimals: u8) -> FlowResult<Decimal> {
    let formatted = format_balance(value, decimals);
    Decimal::from_str(&formatted)
        .map(|d| d.normalize())
        .map_err(|e| FlowError::Validation(format!("{formatted} does not fit a decimal: {e}")))
}

/// Price of one denominator unit in numerator units, both given as raw reserves.
pub fn calculate_price(
    numerator: U256,
    denominator: U256,
    numerator_decimals: u8,
    denominator_decimals: u8,
) -> FlowResult<Decimal> {
    if denominator.is_zero() {
        return Err(FlowError::Validation("Division by zero".to_string()));
    }

    let num_decimal = u256_to_decimal(numerator, numerator_decimals)?;
    let den_decimal = u256_to_decimal(denominator, denominator_decimals)?;

    num_decimal
        .checked_div(den_decimal)
        .ok_or_else(|| FlowError::Validation("price out of range".to_string()))
}

/// Minimum acceptable output for `amount_out` under `slippage` percent (0.5 = 0.5%).
///
/// # Errors
/// `FlowError::Validation` when slippage is outside `0..=100`.
pub fn calculate_minimum_output(amount_out: U256, slippage: Decimal) -> FlowResult<U256> {
    if slippage.is_sign_negative() || slippage > Decimal::ONE_HUNDRED {
        return Err(FlowError::Validation(format!(
            "slippage must be between 0 and 100 percent, got {slippage}"
        )));
    }

    let keep = ((Decimal::ONE_HUNDRED - slippage) * Decimal::from(PPM / 100))
        .trunc()
        .to_u64()
        .ok_or_else(|| FlowError::Validation(format!("invalid slippage {slippage}")))?;

    Ok(amount_out.saturating_mul(U256::from(keep)) / U256::from(PPM))
}

/// Exchange rate (output per input) between tokens with different decimals.
pub fn calculate_exchange_rate(
    amount_in: U256,
    amount_out: U256,
    decimals_in: u8,
    decimals_out: u8,
) -> String {
    if amount_in > U256::ZERO {
        match calculate_price(amount_out, amount_in, decimals_out, decimals_in) {
            Ok(rate) => rate.normalize().to_string(),
            Err(_) => "0".to_string(),
        }
    } else {
        "0".to_string()
    }
}

/// Calculate price impact percentage for a swap against the given reserves.
pub fn calculate_price_impact(
    amount_in: U256,
    amount_out: U256,
    reserve_in: U256,
    reserve_out: U256,
) -> String {
    if reserve_in.is_zero() || reserve_out.is_zero() || amount_in.is_zero() {
        return "0".to_string();
    }

    // Impact = |1 - (price_after / price_before)| * 100
    let price_before = match calculate_price(reserve_out, reserve_in, 18, 18) {
        Ok(p) if !p.is_zero() => p,
        _ => return "0".to_string(),
    };

    let new_reserve_out = reserve_out.saturating_sub(amount_out);
    let new_reserve_in = reserve_in.saturating_add(amount_in);

    let price_after = match calculate_price(new_reserve_out, new_reserve_in, 18, 18) {
        Ok(p) => p,
        Err(_) => return "0".to_string(),
    };

    let impact = (Decimal::ONE - (price_after / price_before)).abs() * Decimal::ONE_HUNDRED;
    impact.round_dp(4).normalize().to_string()
}
