//! Token ownership tracking for the ticket indexer
//!
//! Keeps the fungible balances of the hybrid contract and the current owner of
//! every non-fungible token, for both tracked contract classes.
//!
//! # Components
//!
//! - [`TokenStorage`]: SQLite storage for balances and ownership
//! - [`api::router`]: `/holdings/:address` and `/holders/:tokenType`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ticket_tokens::TokenStorage;
//!
//! let storage = Arc::new(TokenStorage::new("./tokens.db")?);
//! let routes = ticket_tokens::api::router(storage.clone());
//! ```

pub mod api;
pub mod storage;

pub use api::{Erc404Holdings, HolderKind, HoldingsResponse};
pub use storage::{HoldingData, TokenStorage};
