//! Process-wide application context.
//!
//! Built once at startup and handed to every handler; it owns the store
//! handles, the notifier and the tracked contract addresses.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use ticket_common::{normalize_address, TokenClass};
use ticket_lifecycle::{EventDecoder, TicketStorage};
use ticket_tokens::TokenStorage;

use crate::engine_db::{EngineDb, EngineDbConfig};
use crate::notifier::Notifier;
use crate::webhook::updater::StateUpdater;

/// The two tracked contracts, as lowercase addresses
#[derive(Debug, Clone, Default)]
pub struct ContractAddresses {
    pub erc404: Option<String>,
    pub erc721: Option<String>,
}

impl ContractAddresses {
    /// Normalize both addresses; an unparseable address is an error.
    pub fn new(erc404: Option<&str>, erc721: Option<&str>) -> Result<Self> {
        let parse = |raw: Option<&str>, name: &str| -> Result<Option<String>> {
            raw.map(|a| {
                normalize_address(a).with_context(|| format!("Invalid {name} contract address: {a}"))
            })
            .transpose()
        };
        Ok(Self {
            erc404: parse(erc404, "ERC404")?,
            erc721: parse(erc721, "ERC721")?,
        })
    }

    /// Token class of a contract, `None` when it is not tracked
    pub fn classify(&self, contract: &str) -> Option<TokenClass> {
        let contract = normalize_address(contract)?;
        if self.erc404.as_deref() == Some(contract.as_str()) {
            Some(TokenClass::Erc404)
        } else if self.erc721.as_deref() == Some(contract.as_str()) {
            Some(TokenClass::Erc721)
        } else {
            None
        }
    }

    /// Every configured address
    pub fn all(&self) -> Vec<String> {
        self.erc404.iter().chain(self.erc721.iter()).cloned().collect()
    }
}

pub struct AppContext {
    pub engine_db: Arc<EngineDb>,
    pub tokens: Arc<TokenStorage>,
    pub tickets: Arc<TicketStorage>,
    pub notifier: Notifier,
    pub decoder: EventDecoder,
    pub updater: StateUpdater,
    pub contracts: ContractAddresses,
    pub version: String,
    pub startup_time: i64,
}

impl AppContext {
    /// Open the three databases under `db_dir`.
    pub async fn open(db_dir: &Path, contracts: ContractAddresses) -> Result<Self> {
        tokio::fs::create_dir_all(db_dir)
            .await
            .with_context(|| format!("Failed to create database directory {}", db_dir.display()))?;

        let path = |name: &str| db_dir.join(name).to_string_lossy().to_string();

        let engine_db = EngineDb::new(EngineDbConfig {
            path: path("engine.db"),
        })
        .await?;
        let tokens = TokenStorage::new(&path("tokens.db"))?;
        let tickets = TicketStorage::new(&path("tickets.db"))?;

        Ok(Self::from_parts(engine_db, tokens, tickets, contracts))
    }

    /// Context backed entirely by in-memory databases
    pub async fn in_memory(contracts: ContractAddresses) -> Result<Self> {
        let engine_db = EngineDb::new(EngineDbConfig {
            path: ":memory:".to_string(),
        })
        .await?;
        let tokens = TokenStorage::new(":memory:")?;
        let tickets = TicketStorage::new(":memory:")?;

        Ok(Self::from_parts(engine_db, tokens, tickets, contracts))
    }

    fn from_parts(
        engine_db: EngineDb,
        tokens: TokenStorage,
        tickets: TicketStorage,
        contracts: ContractAddresses,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let tickets = Arc::new(tickets);
        let notifier = Notifier::new();
        let updater = StateUpdater::new(
            tokens.clone(),
            tickets.clone(),
            notifier.clone(),
            contracts.clone(),
        );

        Self {
            engine_db: Arc::new(engine_db),
            tokens,
            tickets,
            notifier,
            decoder: EventDecoder::new(),
            updater,
            contracts,
            version: env!("CARGO_PKG_VERSION").to_string(),
            startup_time: chrono::Utc::now().timestamp(),
        }
    }
}
