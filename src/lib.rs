//! Ticket indexer - webhook-driven ownership and ticket lifecycle indexer.
//!
//! Ingests blockchain webhook deliveries for an NFT ticketing product, keeps
//! fungible balances, NFT ownership and ticket outcomes in SQLite, and serves
//! them over HTTP with a WebSocket push channel for UI updates.

pub mod context;
pub mod engine_db;
pub mod http;
pub mod notifier;
pub mod streams;
pub mod webhook;

pub use context::{AppContext, ContractAddresses};
pub use engine_db::EngineDb;
pub use notifier::Notifier;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any as CorsAny, CorsLayer};

use http::create_http_router;
use streams::{StreamConfig, StreamRegistrar, DEFAULT_STREAMS_API_URL};

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Directory holding `engine.db`, `tokens.db` and `tickets.db`.
    pub database_root: PathBuf,
    pub erc404_contract: Option<String>,
    pub erc721_contract: Option<String>,
    /// Streams provider registration; skipped unless key and webhook URL are set.
    pub moralis_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub streams_api_url: String,
    pub chain_id: String,
    /// Graceful shutdown timeout in seconds (default: 30).
    pub shutdown_timeout: u64,
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }
}

/// Builder for ServiceConfig.
#[derive(Default)]
pub struct ServiceConfigBuilder {
    port: Option<u16>,
    host: Option<String>,
    database_root: Option<PathBuf>,
    erc404_contract: Option<String>,
    erc721_contract: Option<String>,
    moralis_api_key: Option<String>,
    webhook_url: Option<String>,
    streams_api_url: Option<String>,
    chain_id: Option<String>,
    shutdown_timeout: Option<u64>,
}

impl ServiceConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the directory for the database files.
    pub fn database_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_root = Some(path.into());
        self
    }

    pub fn erc404_contract(mut self, address: Option<String>) -> Self {
        self.erc404_contract = address;
        self
    }

    pub fn erc721_contract(mut self, address: Option<String>) -> Self {
        self.erc721_contract = address;
        self
    }

    pub fn moralis_api_key(mut self, key: Option<String>) -> Self {
        self.moralis_api_key = key;
        self
    }

    pub fn webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }

    pub fn streams_api_url(mut self, url: String) -> Self {
        self.streams_api_url = Some(url);
        self
    }

    pub fn chain_id(mut self, chain_id: String) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Sets the graceful shutdown timeout in seconds.
    ///
    /// When a shutdown signal (SIGINT/SIGTERM) is received, open connections
    /// get up to this long to finish before the server is stopped.
    pub fn shutdown_timeout(mut self, seconds: u64) -> Self {
        self.shutdown_timeout = Some(seconds);
        self
    }

    pub fn build(self) -> ServiceConfig {
        ServiceConfig {
            port: self.port.unwrap_or(3000),
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            database_root: self.database_root.unwrap_or_else(|| PathBuf::from("./data")),
            erc404_contract: self.erc404_contract,
            erc721_contract: self.erc721_contract,
            moralis_api_key: self.moralis_api_key,
            webhook_url: self.webhook_url,
            streams_api_url: self
                .streams_api_url
                .unwrap_or_else(|| DEFAULT_STREAMS_API_URL.to_string()),
            chain_id: self.chain_id.unwrap_or_else(|| "0x1".to_string()),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(30),
        }
    }
}

/// Register the webhook with the streams provider in the background.
fn spawn_stream_registration(config: &ServiceConfig, contracts: &ContractAddresses) {
    let (Some(api_key), Some(webhook_url)) = (&config.moralis_api_key, &config.webhook_url) else {
        tracing::info!(
            target: "ticket_indexer::main",
            "Stream registration disabled (no API key or webhook URL)"
        );
        return;
    };

    let registrar = StreamRegistrar::new(StreamConfig {
        api_url: config.streams_api_url.clone(),
        api_key: api_key.clone(),
        webhook_url: webhook_url.clone(),
        chain_id: config.chain_id.clone(),
        contracts: contracts.all(),
    });

    tokio::spawn(async move {
        if let Err(e) = registrar.ensure_stream().await {
            tracing::error!(target: "ticket_indexer::main", error = %e, "Stream registration failed");
        }
    });
}

/// Starts the indexer service.
///
/// NOTE: The caller is responsible for initializing the tracing subscriber before calling this function.
pub async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let contracts = ContractAddresses::new(
        config.erc404_contract.as_deref(),
        config.erc721_contract.as_deref(),
    )?;

    if contracts.erc404.is_none() && contracts.erc721.is_none() {
        tracing::warn!(
            target: "ticket_indexer::main",
            "No contract addresses configured, transfers will be ignored"
        );
    }

    tracing::info!(
        target: "ticket_indexer::main",
        database_root = %config.database_root.display(),
        erc404 = ?contracts.erc404,
        erc721 = ?contracts.erc721,
        "Starting ticket indexer"
    );

    let ctx = Arc::new(AppContext::open(&config.database_root, contracts.clone()).await?);

    spawn_stream_registration(&config, &contracts);

    let cors = CorsLayer::new()
        .allow_origin(CorsAny)
        .allow_methods(CorsAny)
        .allow_headers(CorsAny);

    let app = create_http_router(ctx).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "ticket_indexer::main", "Server listening on {}", addr);

    let shutdown_token = CancellationToken::new();
    let server_shutdown_token = shutdown_token.clone();
    let shutdown_timeout = config.shutdown_timeout;

    let shutdown_signal = async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(target: "ticket_indexer::main", "Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(target: "ticket_indexer::main", "Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!(target: "ticket_indexer::main", "Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                tracing::info!(target: "ticket_indexer::main", "Received SIGTERM, initiating graceful shutdown...");
            }
        }

        server_shutdown_token.cancel();
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

    // WebSocket observers hold connections open; bound how long we wait for them.
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "ticket_indexer::main", "Server error: {}", e);
            }
        }
        () = async {
            shutdown_token.cancelled().await;
            tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        } => {
            tracing::warn!(
                target: "ticket_indexer::main",
                "Server connections did not close within {}s, forcing shutdown",
                shutdown_timeout
            );
        }
    }

    tracing::info!(target: "ticket_indexer::main", "Ticket indexer shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ServiceConfig::builder().build();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.database_root, PathBuf::from("./data"));
        assert_eq!(config.streams_api_url, DEFAULT_STREAMS_API_URL);
        assert_eq!(config.chain_id, "0x1");
        assert_eq!(config.shutdown_timeout, 30);
        assert!(config.moralis_api_key.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ServiceConfig::builder()
            .port(8080)
            .database_root("/tmp/tickets")
            .erc404_contract(Some("0x0000000000000000000000000000000000000404".to_string()))
            .shutdown_timeout(5)
            .build();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_root, PathBuf::from("/tmp/tickets"));
        assert!(config.erc404_contract.is_some());
        assert_eq!(config.shutdown_timeout, 5);
    }
}
