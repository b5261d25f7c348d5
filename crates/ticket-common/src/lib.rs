//! Common utilities for the ticket indexer crates
//!
//! Provides normalization of the raw strings found in webhook payloads
//! (addresses, token ids, block timestamps), the token class catalog, decimal
//! amount arithmetic, and the error type shared by the HTTP handlers.

pub mod amount;
pub mod api;

use alloy_primitives::Address;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use amount::{add_amounts, is_negative, is_positive, parse_amount, sub_amounts, AmountError};
pub use api::ApiError;

/// Canonical zero address, used as `from` on mints.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// The two tracked contract categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenClass {
    /// Hybrid fungible/non-fungible contract.
    #[serde(rename = "ERC404")]
    Erc404,
    /// Plain non-fungible contract.
    #[serde(rename = "ERC721")]
    Erc721,
}

impl TokenClass {
    pub const ALL: [Self; 2] = [Self::Erc404, Self::Erc721];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Erc404 => "ERC404",
            Self::Erc721 => "ERC721",
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ERC404" => Ok(Self::Erc404),
            "ERC721" => Ok(Self::Erc721),
            other => Err(anyhow::anyhow!("unknown token class {other}")),
        }
    }
}

/// Lookup of the tokens an address currently holds, across both classes.
///
/// Implemented by the ownership store and consumed by query handlers that
/// join other records against ownership.
pub trait OwnershipIndex: Send + Sync {
    fn owned_tokens(&self, owner: &str) -> anyhow::Result<Vec<(TokenClass, String)>>;
}

// ===== Addresses =====

/// Parse a hex address (any case, `0x` prefixed) into its canonical lowercase form.
pub fn normalize_address(raw: &str) -> Option<String> {
    let address = Address::from_str(raw.trim()).ok()?;
    Some(address_to_string(&address))
}

/// Render an address as lowercase `0x`-prefixed hex.
pub fn address_to_string(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

pub fn is_zero_address(address: &str) -> bool {
    normalize_address(address).is_some_and(|a| a == ZERO_ADDRESS)
}

// ===== Token ids =====

/// Normalize a token id to its decimal representation.
///
/// Payloads carry decimal strings; `0x` hex is accepted as well.
pub fn normalize_token_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let value = if let Some(hex_digits) = raw.strip_prefix("0x") {
        BigUint::parse_bytes(hex_digits.as_bytes(), 16)?
    } else {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        BigUint::parse_bytes(raw.as_bytes(), 10)?
    };
    Some(value.to_str_radix(10))
}

// ===== Timestamps =====

/// Build a UTC timestamp from unix seconds.
pub fn timestamp_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Build a UTC timestamp from unix milliseconds (storage format).
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Serialize a timestamp as RFC 3339 UTC with millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `serialize_with` adapter for [`format_timestamp`].
pub fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_timestamp(ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address_lowercases() {
        let addr = normalize_address("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        assert_eq!(addr, "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_normalize_address_rejects_garbage() {
        assert!(normalize_address("0x1234").is_none());
        assert!(normalize_address("not an address").is_none());
    }

    #[test]
    fn test_zero_address() {
        assert!(is_zero_address(ZERO_ADDRESS));
        assert!(is_zero_address("0x0000000000000000000000000000000000000000"));
        assert!(!is_zero_address("0x0000000000000000000000000000000000000001"));
    }

    #[test]
    fn test_normalize_token_id() {
        assert_eq!(normalize_token_id("42").as_deref(), Some("42"));
        assert_eq!(normalize_token_id("0x2a").as_deref(), Some("42"));
        assert_eq!(normalize_token_id("007").as_deref(), Some("7"));
        assert!(normalize_token_id("").is_none());
        assert!(normalize_token_id("-1").is_none());
        assert!(normalize_token_id("12a").is_none());
    }

    #[test]
    fn test_format_timestamp() {
        let ts = timestamp_from_secs(1_700_000_000).unwrap();
        assert_eq!(format_timestamp(&ts), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_token_class_round_trip_str() {
        for class in TokenClass::ALL {
            assert_eq!(class.as_str().parse::<TokenClass>().unwrap(), class);
        }
        assert!("ERC20".parse::<TokenClass>().is_err());
    }
}
