//! Configuration for the ticket indexer

use anyhow::Result;
use clap::Parser;
use ticket_common::normalize_address;

/// Ticket Indexer
///
/// Receives blockchain webhook deliveries for the ticket contracts and serves
/// balances, ownership and ticket outcomes over HTTP.
///
/// # Examples
///
/// ```bash
/// # Track both contracts, no stream registration
/// ticket-indexer --erc404-contract 0x... --erc721-contract 0x...
///
/// # Register the webhook with the streams provider at startup
/// MORALIS_API_KEY=... ticket-indexer --webhook-url https://indexer.example.com/webhook
/// ```
#[derive(Parser, Debug)]
#[command(name = "ticket-indexer")]
#[command(about = "Index NFT ticket ownership and outcomes from blockchain webhooks", long_about = None)]
pub struct Config {
    /// Directory where all databases will be stored
    ///
    /// Creates: engine.db, tokens.db, tickets.db
    #[arg(long, env = "DATABASE_DIR", default_value = "./data")]
    pub db_dir: String,

    /// Host to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Hybrid fungible/non-fungible contract address
    #[arg(long, env = "ERC404_CONTRACT_ADDRESS")]
    pub erc404_contract: Option<String>,

    /// Non-fungible contract address
    #[arg(long, env = "ERC721_CONTRACT_ADDRESS")]
    pub erc721_contract: Option<String>,

    /// Streams provider API key (enables stream registration)
    #[arg(long, env = "MORALIS_API_KEY", hide_env_values = true)]
    pub moralis_api_key: Option<String>,

    /// Public URL of this service's webhook endpoint
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Streams provider API base URL
    #[arg(long, default_value = "https://api.moralis-streams.com")]
    pub streams_api_url: String,

    /// Hex chain id the stream listens on
    #[arg(long, env = "CHAIN_ID", default_value = "0x1")]
    pub chain_id: String,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value = "30")]
    pub shutdown_timeout: u64,
}

impl Config {
    /// Reject malformed contract addresses before anything is opened
    pub fn validate(&self) -> Result<()> {
        for (name, address) in [
            ("--erc404-contract", &self.erc404_contract),
            ("--erc721-contract", &self.erc721_contract),
        ] {
            if let Some(address) = address {
                if normalize_address(address).is_none() {
                    anyhow::bail!("Invalid address for {name}: {address}");
                }
            }
        }

        if self.moralis_api_key.is_some() != self.webhook_url.is_some() {
            tracing::warn!(
                target: "ticket_indexer::config",
                "Stream registration needs both MORALIS_API_KEY and WEBHOOK_URL, skipping"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["ticket-indexer"]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_dir, "./data");
        assert_eq!(config.chain_id, "0x1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_contract_is_rejected() {
        let config =
            Config::try_parse_from(["ticket-indexer", "--erc404-contract", "0xnope"]).unwrap();
        assert!(config.validate().is_err());
    }
}
