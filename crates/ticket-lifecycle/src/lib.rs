//! Ticket lifecycle indexing
//!
//! Decodes the ticket game's contract events and keeps the records they
//! produce: opening requests and the accumulated minting outcome of every
//! ticket (prize levels, roll result, payout).
//!
//! # Components
//!
//! - [`EventDecoder`]: ordered catalog of event matchers
//! - [`TicketStorage`]: SQLite storage for openings and minting details
//! - [`api::router`]: openings and minting-details lookups

pub mod api;
pub mod decoder;
pub mod storage;

pub use decoder::{
    catalog_abi, catalog_signatures, EventDecoder, Match, RawLog, TicketEvent, TicketLevel,
};
pub use storage::{MintingDetails, OpeningRecord, TicketStorage};
