//! Decimal-string amount arithmetic
//!
//! Balances are persisted as base-10 strings and combined with arbitrary
//! precision integers, so no value is ever routed through a float.

use num_bigint::BigInt;
use num_traits::Signed;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid decimal amount `{0}`")]
    Invalid(String),
}

/// Parse a base-10 integer string, with an optional leading `-`.
pub fn parse_amount(raw: &str) -> Result<BigInt, AmountError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Invalid(raw.to_string()));
    }
    BigInt::parse_bytes(trimmed.as_bytes(), 10).ok_or_else(|| AmountError::Invalid(raw.to_string()))
}

pub fn add_amounts(balance: &str, delta: &str) -> Result<String, AmountError> {
    Ok((parse_amount(balance)? + parse_amount(delta)?).to_string())
}

pub fn sub_amounts(balance: &str, delta: &str) -> Result<String, AmountError> {
    Ok((parse_amount(balance)? - parse_amount(delta)?).to_string())
}

/// Strictly greater than zero. Unparseable input counts as not positive.
pub fn is_positive(amount: &str) -> bool {
    parse_amount(amount).is_ok_and(|v| v.is_positive())
}

/// Strictly below zero.
pub fn is_negative(amount: &str) -> bool {
    parse_amount(amount).is_ok_and(|v| v.is_negative())
}
