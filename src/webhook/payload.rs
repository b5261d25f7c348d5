//! Webhook payload as delivered by the streams provider, and its conversion
//! into typed transfers and logs.
//!
//! Every field is optional on the wire. Array elements are kept as
//! [`Lenient`] values and converted one at a time, so a single malformed
//! entry never rejects the whole delivery.

use alloy_primitives::{Bytes, B256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use ticket_common::{normalize_address, normalize_token_id, parse_amount};
use ticket_lifecycle::RawLog;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid address in `{field}`: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid token id: {0}")]
    InvalidTokenId(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid hex in `{field}`: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("malformed entry: {0}")]
    Malformed(String),
}

/// One array element of a delivery. An element that does not fit the entry
/// shape is kept with its decode error instead of failing the whole body.
#[derive(Debug, Clone)]
pub enum Lenient<T> {
    Entry(T),
    Malformed(String),
}

impl<T> Lenient<T> {
    pub fn get(&self) -> Result<&T, PayloadError> {
        match self {
            Self::Entry(entry) => Ok(entry),
            Self::Malformed(reason) => Err(PayloadError::Malformed(reason.clone())),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value(value) {
            Ok(entry) => Self::Entry(entry),
            Err(e) => Self::Malformed(e.to_string()),
        })
    }
}

/// A missing or `null` array is empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<Lenient<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(Option::<Vec<Lenient<T>>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept a JSON string or number, yielding its text.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookPayload {
    pub confirmed: bool,
    #[serde(deserialize_with = "string_or_number")]
    pub chain_id: Option<String>,
    pub block: Option<BlockInfo>,
    #[serde(deserialize_with = "lenient_list")]
    pub logs: Vec<Lenient<LogEntry>>,
    #[serde(deserialize_with = "lenient_list")]
    pub erc20_transfers: Vec<Lenient<Erc20TransferEntry>>,
    #[serde(deserialize_with = "lenient_list")]
    pub nft_transfers: Vec<Lenient<NftTransferEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub number: Option<String>,
    pub hash: Option<String>,
    /// Unix seconds
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub log_index: Option<String>,
    pub transaction_hash: Option<String>,
    pub address: Option<String>,
    pub data: Option<String>,
    pub topic0: Option<String>,
    pub topic1: Option<String>,
    pub topic2: Option<String>,
    pub topic3: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Erc20TransferEntry {
    pub transaction_hash: Option<String>,
    pub contract: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NftTransferEntry {
    pub transaction_hash: Option<String>,
    pub contract: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub token_id: Option<String>,
}

/// Validated non-fungible transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftTransfer {
    pub tx_hash: String,
    pub contract: String,
    pub from: String,
    pub to: String,
    pub token_id: String,
}

/// Validated fungible transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleTransfer {
    pub tx_hash: String,
    pub contract: String,
    pub from: String,
    pub to: String,
    pub amount: String,
}

/// Validated contract log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractLog {
    pub tx_hash: String,
    pub log_index: Option<u64>,
    pub raw: RawLog,
}

fn required<'a>(value: Option<&'a String>, field: &'static str) -> Result<&'a str, PayloadError> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(PayloadError::MissingField(field))
}

fn address(value: Option<&String>, field: &'static str) -> Result<String, PayloadError> {
    let raw = required(value, field)?;
    normalize_address(raw).ok_or_else(|| PayloadError::InvalidAddress {
        field,
        value: raw.to_string(),
    })
}

/// Transaction hashes are compared case-insensitively.
pub fn tx_hash_of(value: Option<&String>) -> Result<String, PayloadError> {
    Ok(required(value, "transactionHash")?.to_lowercase())
}

impl NftTransferEntry {
    pub fn to_transfer(&self) -> Result<NftTransfer, PayloadError> {
        let raw_id = required(self.token_id.as_ref(), "tokenId")?;
        Ok(NftTransfer {
            tx_hash: tx_hash_of(self.transaction_hash.as_ref())?,
            contract: address(self.contract.as_ref(), "contract")?,
            from: address(self.from.as_ref(), "from")?,
            to: address(self.to.as_ref(), "to")?,
            token_id: normalize_token_id(raw_id)
                .ok_or_else(|| PayloadError::InvalidTokenId(raw_id.to_string()))?,
        })
    }
}

impl Erc20TransferEntry {
    pub fn to_transfer(&self) -> Result<FungibleTransfer, PayloadError> {
        let amount = required(self.value.as_ref(), "value")?;
        // Signed values are only meaningful for stored balances
        if amount.starts_with('-') {
            return Err(PayloadError::InvalidAmount(amount.to_string()));
        }
        let parsed =
            parse_amount(amount).map_err(|_| PayloadError::InvalidAmount(amount.to_string()))?;
        Ok(FungibleTransfer {
            tx_hash: tx_hash_of(self.transaction_hash.as_ref())?,
            contract: address(self.contract.as_ref(), "contract")?,
            from: address(self.from.as_ref(), "from")?,
            to: address(self.to.as_ref(), "to")?,
            amount: parsed.to_string(),
        })
    }
}

impl LogEntry {
    /// Topic slots in order, stopping at the first empty one.
    fn topics(&self) -> Result<Vec<B256>, PayloadError> {
        [&self.topic0, &self.topic1, &self.topic2, &self.topic3]
            .into_iter()
            .map_while(|slot| slot.as_deref().map(str::trim).filter(|s| !s.is_empty()))
            .map(|topic| {
                B256::from_str(topic).map_err(|_| PayloadError::InvalidHex {
                    field: "topic",
                    value: topic.to_string(),
                })
            })
            .collect()
    }

    pub fn to_log(&self) -> Result<ContractLog, PayloadError> {
        let data = match self.data.as_deref().map(str::trim) {
            None | Some("") => Bytes::new(),
            Some(hex_data) => Bytes::from_str(hex_data).map_err(|_| PayloadError::InvalidHex {
                field: "data",
                value: hex_data.to_string(),
            })?,
        };

        Ok(ContractLog {
            tx_hash: tx_hash_of(self.transaction_hash.as_ref())?,
            log_index: self.log_index.as_deref().and_then(|i| i.parse().ok()),
            raw: RawLog {
                address: address(self.address.as_ref(), "address")?,
                topics: self.topics()?,
                data,
            },
        })
    }
}

impl WebhookPayload {
    /// Block timestamp in unix seconds, when present and numeric
    pub fn block_timestamp(&self) -> Option<i64> {
        self.block
            .as_ref()?
            .timestamp
            .as_deref()?
            .trim()
            .parse()
            .ok()
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block.as_ref()?.number.as_deref()?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_payload_parsing() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "confirmed": false,
            "chainId": "0x1",
            "block": { "number": 100, "hash": "0xbb", "timestamp": "1700000000" },
            "nftTransfers": [{
                "transactionHash": "0xAA",
                "contract": "0x00000000000000000000000000000000000000C0",
                "from": "0x0000000000000000000000000000000000000000",
                "to": "0x00000000000000000000000000000000000000A1",
                "tokenId": "12"
            }]
        }))
        .unwrap();

        assert!(!payload.confirmed);
        assert!(payload.logs.is_empty());
        assert_eq!(payload.block_number(), Some(100));
        assert_eq!(payload.block_timestamp(), Some(1_700_000_000));

        let transfer = payload.nft_transfers[0]
            .get()
            .and_then(NftTransferEntry::to_transfer)
            .unwrap();
        assert_eq!(transfer.tx_hash, "0xaa");
        assert_eq!(transfer.contract, "0x00000000000000000000000000000000000000c0");
        assert_eq!(transfer.to, "0x00000000000000000000000000000000000000a1");
        assert_eq!(transfer.token_id, "12");
    }

    #[test]
    fn test_empty_object_is_a_valid_payload() {
        let payload: WebhookPayload = serde_json::from_str("{}").unwrap();
        assert!(!payload.confirmed);
        assert!(payload.nft_transfers.is_empty());
        assert_eq!(payload.block_timestamp(), None);
    }

    #[test]
    fn test_malformed_transfers_are_rejected_individually() {
        let missing_to = NftTransferEntry {
            transaction_hash: Some("0x01".into()),
            contract: Some("0x00000000000000000000000000000000000000c0".into()),
            from: Some("0x0000000000000000000000000000000000000000".into()),
            to: None,
            token_id: Some("1".into()),
        };
        assert_eq!(
            missing_to.to_transfer(),
            Err(PayloadError::MissingField("to"))
        );

        let bad_value = Erc20TransferEntry {
            transaction_hash: Some("0x01".into()),
            contract: Some("0x00000000000000000000000000000000000000c0".into()),
            from: Some("0x0000000000000000000000000000000000000000".into()),
            to: Some("0x00000000000000000000000000000000000000a1".into()),
            value: Some("1.5".into()),
        };
        assert_eq!(
            bad_value.to_transfer(),
            Err(PayloadError::InvalidAmount("1.5".into()))
        );

        let negative = Erc20TransferEntry {
            value: Some("-1000".into()),
            ..bad_value
        };
        assert_eq!(
            negative.to_transfer(),
            Err(PayloadError::InvalidAmount("-1000".into()))
        );
    }

    #[test]
    fn test_mistyped_entry_does_not_reject_the_body() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "nftTransfers": [
                {
                    "transactionHash": "0x01",
                    "contract": "0x00000000000000000000000000000000000000c0",
                    "from": "0x0000000000000000000000000000000000000000",
                    "to": "0x00000000000000000000000000000000000000a1",
                    "tokenId": "5"
                },
                { "transactionHash": "0x01", "to": 123 },
                null
            ],
            "erc20Transfers": null,
            "logs": [42]
        }))
        .unwrap();

        assert_eq!(payload.nft_transfers.len(), 3);
        assert!(payload.nft_transfers[0].get().is_ok());
        assert!(matches!(
            payload.nft_transfers[1].get(),
            Err(PayloadError::Malformed(_))
        ));
        assert!(payload.nft_transfers[2].get().is_err());
        assert!(payload.erc20_transfers.is_empty());
        assert!(payload.logs[0].get().is_err());
    }

    #[test]
    fn test_log_conversion() {
        let entry = LogEntry {
            log_index: Some("3".into()),
            transaction_hash: Some("0x01".into()),
            address: Some("0x00000000000000000000000000000000000000C0".into()),
            data: Some("0x00ff".into()),
            topic0: Some(format!("0x{}", "11".repeat(32))),
            topic1: Some(format!("0x{}", "22".repeat(32))),
            topic2: None,
            topic3: Some(format!("0x{}", "33".repeat(32))),
        };

        let log = entry.to_log().unwrap();
        assert_eq!(log.log_index, Some(3));
        assert_eq!(log.raw.topics.len(), 2);
        assert_eq!(&log.raw.data[..], &[0x00u8, 0xff]);
    }

    #[test]
    fn test_log_with_bad_topic_is_rejected() {
        let entry = LogEntry {
            transaction_hash: Some("0x01".into()),
            address: Some("0x00000000000000000000000000000000000000c0".into()),
            topic0: Some("0x1234".into()),
            ..Default::default()
        };
        assert!(matches!(
            entry.to_log(),
            Err(PayloadError::InvalidHex { field: "topic", .. })
        ));
    }
}
