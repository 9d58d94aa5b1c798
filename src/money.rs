//! Money Module
//!
//! All currency arithmetic of the ledger goes through here. Balances are
//! `numeric(p, 2)` in the store and `Decimal` in process; nothing is ever
//! converted through floating point.
//!
//! ## Rounding
//! Fees are rounded to [`CURRENCY_SCALE`] places, half away from zero (the same
//! rule as SQL `round(numeric, 2)`), before they are compared or applied. The
//! three balance deltas of a transfer therefore sum to exactly zero.
//!
//! ## Usage
//! ```rust
//! use fee_ledger::money::{compute_fee, parse_amount};
//! use rust_decimal::Decimal;
//!
//! let amount = parse_amount("100").unwrap();
//! let fee = compute_fee(amount, Decimal::new(1, 2)).unwrap();
//! assert_eq!(fee.to_string(), "1.00");
//! ```

use crate::core_types::CURRENCY_SCALE;
use rust_decimal::prelude::*;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Money validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Balance must not be negative")]
    NegativeBalance,

    #[error("Fee rate must be within [0, 1], got {0}")]
    InvalidFeeRate(Decimal),

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Rounding & Fees
// ============================================================================

/// Round to currency precision, half away from zero.
#[inline]
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the fee for `amount` at `fee_rate`: `round(amount * fee_rate, 2)`.
///
/// The fee is charged on `amount` only, never on `amount + fee`.
pub fn compute_fee(amount: Decimal, fee_rate: Decimal) -> Result<Decimal, MoneyError> {
    let raw = amount.checked_mul(fee_rate).ok_or(MoneyError::Overflow)?;
    Ok(round_currency(raw))
}

// ============================================================================
// Validation
// ============================================================================

fn check_precision(value: Decimal) -> Result<(), MoneyError> {
    let provided = value.normalize().scale();
    if provided > CURRENCY_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided,
            max: CURRENCY_SCALE,
        });
    }
    Ok(())
}

/// A transfer amount: strictly positive, at most currency precision.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    check_precision(amount)?;
    Ok(amount)
}

/// An opening balance: zero or positive, at most currency precision.
pub fn validate_balance(balance: Decimal) -> Result<Decimal, MoneyError> {
    if balance.is_sign_negative() && !balance.is_zero() {
        return Err(MoneyError::NegativeBalance);
    }
    check_precision(balance)?;
    Ok(balance)
}

/// A fee rate: a fraction within `[0, 1]`.
pub fn validate_fee_rate(rate: Decimal) -> Result<Decimal, MoneyError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(MoneyError::InvalidFeeRate(rate));
    }
    Ok(rate)
}

// ============================================================================
// Parse / Format
// ============================================================================

fn parse_decimal(input: &str) -> Result<Decimal, MoneyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".to_string()));
    }
    Decimal::from_str(trimmed).map_err(|_| MoneyError::InvalidFormat(trimmed.to_string()))
}

/// Parse a client-supplied transfer amount ("100", "99.95").
pub fn parse_amount(input: &str) -> Result<Decimal, MoneyError> {
    validate_amount(parse_decimal(input)?)
}

/// Parse an opening balance ("0", "2000.00").
pub fn parse_balance(input: &str) -> Result<Decimal, MoneyError> {
    validate_balance(parse_decimal(input)?)
}

/// Parse a fee rate ("0.01" for 1%).
pub fn parse_fee_rate(input: &str) -> Result<Decimal, MoneyError> {
    validate_fee_rate(parse_decimal(input)?)
}

/// Format a balance with exactly two decimals: `1899` -> `"1899.00"`.
pub fn format_amount(value: Decimal) -> String {
    let mut v = round_currency(value);
    v.rescale(CURRENCY_SCALE);
    v.to_string()
}
