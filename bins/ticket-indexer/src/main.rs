//! Ticket Indexer - webhook-driven NFT ticket indexer
//!
//! Ingests blockchain webhook deliveries for the ticket contracts and keeps
//! a queryable view of balances, ownership and ticket outcomes.
//!
//! # Features
//!
//! - Idempotent webhook ingestion keyed by transaction hash
//! - Fungible balances and NFT ownership for the ERC404 and ERC721 contracts
//! - Ticket mint, opening and resolution records
//! - WebSocket push channel for UI updates
//! - Optional stream registration with the streams provider
//!
//! # Usage
//!
//! ```bash
//! ticket-indexer --erc404-contract 0x... --erc721-contract 0x... --port 3000
//! ```

mod config;

use anyhow::Result;
use clap::Parser;
use config::Config;
use ticket_indexer::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let config = Config::parse();
    config.validate()?;

    let service_config = ServiceConfig::builder()
        .host(config.host)
        .port(config.port)
        .database_root(config.db_dir)
        .erc404_contract(config.erc404_contract)
        .erc721_contract(config.erc721_contract)
        .moralis_api_key(config.moralis_api_key)
        .webhook_url(config.webhook_url)
        .streams_api_url(config.streams_api_url)
        .chain_id(config.chain_id)
        .shutdown_timeout(config.shutdown_timeout)
        .build();

    ticket_indexer::run(service_config).await
}
