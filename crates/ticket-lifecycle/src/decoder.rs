//! Ticket game event decoder
//!
//! Each catalog entry is a matcher that succeeds only when topic0 equals the
//! event signature hash and the remaining topics and data decode under the
//! event's ABI layout. Matchers run in catalog order and the first hit wins.

use alloy_primitives::{Bytes, LogData, B256, U256};
use alloy_sol_types::{sol, SolEvent, TopicList};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ticket_common::address_to_string;

sol! {
    interface ITicketGame {
        struct Level {
            uint256 winAmount;
            uint256 rollNumber;
        }

        event TicketMinted(uint256 indexed tokenId, address indexed owner, Level[] levels);

        event TicketOpeningInitiated(uint256 indexed tokenId, address indexed opener, uint256 requestId);

        event TicketResolved(uint256 indexed tokenId, uint256 rollResult, uint256 winAmount);

        event RewardPaid(uint256 indexed tokenId, address indexed winner, uint256 rollResult, uint256 amount);

        event PoolDeposited(address indexed depositor, uint256 amount);

        event PoolWithdrawn(address indexed recipient, uint256 amount);
    }
}

use ITicketGame::{
    PoolDeposited, PoolWithdrawn, RewardPaid, TicketMinted, TicketOpeningInitiated,
    TicketResolved,
};

/// One prize tier carried by a mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketLevel {
    /// Decimal string, arbitrary precision
    pub win_amount: String,
    pub roll_number: i64,
}

/// A recognized catalog event with its fields in storage form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketEvent {
    Minted {
        token_id: String,
        owner: String,
        levels: Vec<TicketLevel>,
    },
    OpeningInitiated {
        token_id: String,
        opener: String,
        request_id: String,
    },
    Resolved {
        token_id: String,
        roll_result: i64,
        win_amount: String,
    },
    RewardPaid {
        token_id: String,
        winner: String,
        roll_result: i64,
        amount: String,
    },
    PoolDeposited {
        depositor: String,
        amount: String,
    },
    PoolWithdrawn {
        recipient: String,
        amount: String,
    },
}

impl TicketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Minted { .. } => "TicketMinted",
            Self::OpeningInitiated { .. } => "TicketOpeningInitiated",
            Self::Resolved { .. } => "TicketResolved",
            Self::RewardPaid { .. } => "RewardPaid",
            Self::PoolDeposited { .. } => "PoolDeposited",
            Self::PoolWithdrawn { .. } => "PoolWithdrawn",
        }
    }
}

/// Outcome of running a log through the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Matched(TicketEvent),
    Unmatched,
}

/// A contract log in binary form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Lowercase emitting contract address
    pub address: String,
    /// topic0 first; empty topic slots are omitted
    pub topics: Vec<B256>,
    pub data: Bytes,
}

type Matcher = fn(&LogData) -> Option<TicketEvent>;

/// Catalog in priority order
const MATCHERS: &[Matcher] = &[
    match_ticket_minted,
    match_opening_initiated,
    match_ticket_resolved,
    match_reward_paid,
    match_pool_deposited,
    match_pool_withdrawn,
];

/// Decoder over the ticket game event catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Try every matcher in order. Never fails: a log that fits no shape is
    /// reported as [`Match::Unmatched`].
    pub fn decode(&self, log: &RawLog) -> Match {
        let Some(log_data) = LogData::new(log.topics.clone(), log.data.clone()) else {
            tracing::debug!(
                target: "ticket_lifecycle::decoder",
                address = %log.address,
                topics = log.topics.len(),
                "Log carries too many topics"
            );
            return Match::Unmatched;
        };

        for matcher in MATCHERS {
            if let Some(event) = matcher(&log_data) {
                return Match::Matched(event);
            }
        }

        Match::Unmatched
    }
}

/// Decode `E` only when topic0 is its signature hash and the topic count
/// matches the event's indexed layout.
fn decode_as<E: SolEvent>(log: &LogData) -> Option<E> {
    if log.topics().first() != Some(&E::SIGNATURE_HASH) {
        return None;
    }
    if log.topics().len() != <E::TopicList as TopicList>::COUNT {
        tracing::debug!(
            target: "ticket_lifecycle::decoder",
            event = E::SIGNATURE,
            topics = log.topics().len(),
            "Signature matched but topic count did not"
        );
        return None;
    }
    match E::decode_log_data(log, true) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(
                target: "ticket_lifecycle::decoder",
                event = E::SIGNATURE,
                error = %e,
                "Signature matched but payload did not decode"
            );
            None
        }
    }
}

/// Narrow a uint256 into the integer range the store keeps.
fn small_int(value: U256) -> Option<i64> {
    u64::try_from(value)
        .ok()
        .and_then(|v| i64::try_from(v).ok())
}

fn match_ticket_minted(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<TicketMinted>(log)?;
    let levels = event
        .levels
        .iter()
        .map(|level| {
            Some(TicketLevel {
                win_amount: level.winAmount.to_string(),
                roll_number: small_int(level.rollNumber)?,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(TicketEvent::Minted {
        token_id: event.tokenId.to_string(),
        owner: address_to_string(&event.owner),
        levels,
    })
}

fn match_opening_initiated(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<TicketOpeningInitiated>(log)?;
    Some(TicketEvent::OpeningInitiated {
        token_id: event.tokenId.to_string(),
        opener: address_to_string(&event.opener),
        request_id: event.requestId.to_string(),
    })
}

fn match_ticket_resolved(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<TicketResolved>(log)?;
    Some(TicketEvent::Resolved {
        token_id: event.tokenId.to_string(),
        roll_result: small_int(event.rollResult)?,
        win_amount: event.winAmount.to_string(),
    })
}

fn match_reward_paid(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<RewardPaid>(log)?;
    Some(TicketEvent::RewardPaid {
        token_id: event.tokenId.to_string(),
        winner: address_to_string(&event.winner),
        roll_result: small_int(event.rollResult)?,
        amount: event.amount.to_string(),
    })
}

fn match_pool_deposited(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<PoolDeposited>(log)?;
    Some(TicketEvent::PoolDeposited {
        depositor: address_to_string(&event.depositor),
        amount: event.amount.to_string(),
    })
}

fn match_pool_withdrawn(log: &LogData) -> Option<TicketEvent> {
    let event = decode_as::<PoolWithdrawn>(log)?;
    Some(TicketEvent::PoolWithdrawn {
        recipient: address_to_string(&event.recipient),
        amount: event.amount.to_string(),
    })
}

/// Canonical signatures of the catalog, in priority order
pub fn catalog_signatures() -> Vec<&'static str> {
    vec![
        TicketMinted::SIGNATURE,
        TicketOpeningInitiated::SIGNATURE,
        TicketResolved::SIGNATURE,
        RewardPaid::SIGNATURE,
        PoolDeposited::SIGNATURE,
        PoolWithdrawn::SIGNATURE,
    ]
}

/// JSON ABI fragments for the catalog events
pub fn catalog_abi() -> serde_json::Value {
    let uint = |name: &str, indexed: bool| {
        json!({ "indexed": indexed, "internalType": "uint256", "name": name, "type": "uint256" })
    };
    let address = |name: &str| {
        json!({ "indexed": true, "internalType": "address", "name": name, "type": "address" })
    };
    let event = |name: &str, inputs: Vec<serde_json::Value>| {
        json!({ "anonymous": false, "inputs": inputs, "name": name, "type": "event" })
    };

    json!([
        event(
            "TicketMinted",
            vec![
                uint("tokenId", true),
                address("owner"),
                json!({
                    "indexed": false,
                    "internalType": "struct Level[]",
                    "name": "levels",
                    "type": "tuple[]",
                    "components": [
                        { "internalType": "uint256", "name": "winAmount", "type": "uint256" },
                        { "internalType": "uint256", "name": "rollNumber", "type": "uint256" }
                    ]
                }),
            ],
        ),
        event(
            "TicketOpeningInitiated",
            vec![uint("tokenId", true), address("opener"), uint("requestId", false)],
        ),
        event(
            "TicketResolved",
            vec![
                uint("tokenId", true),
                uint("rollResult", false),
                uint("winAmount", false),
            ],
        ),
        event(
            "RewardPaid",
            vec![
                uint("tokenId", true),
                address("winner"),
                uint("rollResult", false),
                uint("amount", false),
            ],
        ),
        event("PoolDeposited", vec![address("depositor"), uint("amount", false)]),
        event("PoolWithdrawn", vec![address("recipient"), uint("amount", false)]),
    ])
}
