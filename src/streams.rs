//! Registration of the webhook with the streams provider.
//!
//! At startup the service makes sure a stream exists for its webhook URL and
//! that both tracked contracts are attached to it. Registration failures are
//! reported to the caller; the server keeps running without them.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_STREAMS_API_URL: &str = "https://api.moralis-streams.com";

/// Transfers are delivered as `nftTransfers`/`erc20Transfers` only when the
/// stream also listens for the standard transfer topic
const TRANSFER_SIGNATURE: &str = "Transfer(address,address,uint256)";

const STREAM_TAG: &str = "ticket-indexer";

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("streams API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("streams API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Stream registration settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub api_url: String,
    pub api_key: String,
    pub webhook_url: String,
    /// Hex chain id, e.g. `0x1`
    pub chain_id: String,
    pub contracts: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamSummary {
    id: String,
    #[serde(default)]
    webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamList {
    #[serde(default)]
    result: Vec<StreamSummary>,
}

#[derive(Debug, Clone)]
pub struct StreamRegistrar {
    config: StreamConfig,
    http_client: Client,
}

impl StreamRegistrar {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StreamError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Find the stream already pointing at our webhook URL
    async fn find_existing(&self) -> Result<Option<String>, StreamError> {
        let response = self
            .http_client
            .get(self.url("/streams/evm"))
            .query(&[("limit", "100")])
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await?;
        let list: StreamList = Self::check(response).await?.json().await?;

        Ok(list
            .result
            .into_iter()
            .find(|s| s.webhook_url.as_deref() == Some(self.config.webhook_url.as_str()))
            .map(|s| s.id))
    }

    async fn create(&self) -> Result<String, StreamError> {
        let mut topic0: Vec<&str> = ticket_lifecycle::catalog_signatures();
        topic0.push(TRANSFER_SIGNATURE);

        let body = json!({
            "webhookUrl": self.config.webhook_url,
            "description": "Ticket ownership and lifecycle events",
            "tag": STREAM_TAG,
            "chainIds": [self.config.chain_id],
            "includeContractLogs": true,
            "includeNativeTxs": false,
            "allAddresses": false,
            "abi": ticket_lifecycle::catalog_abi(),
            "topic0": topic0,
        });

        let response = self
            .http_client
            .put(self.url("/streams/evm"))
            .header("X-API-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let created: StreamSummary = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn attach_contracts(&self, stream_id: &str) -> Result<(), StreamError> {
        if self.config.contracts.is_empty() {
            return Ok(());
        }

        let response = self
            .http_client
            .post(self.url(&format!("/streams/evm/{stream_id}/address")))
            .header("X-API-Key", &self.config.api_key)
            .json(&json!({ "address": self.config.contracts }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Ensure a stream exists for the webhook URL and watches our contracts.
    /// Returns the stream id.
    pub async fn ensure_stream(&self) -> Result<String, StreamError> {
        let stream_id = if let Some(id) = self.find_existing().await? {
            tracing::info!(target: "ticket_indexer::streams", stream_id = %id, "Reusing existing stream");
            id
        } else {
            let id = self.create().await?;
            tracing::info!(target: "ticket_indexer::streams", stream_id = %id, "Created stream");
            id
        };

        self.attach_contracts(&stream_id).await?;
        tracing::info!(
            target: "ticket_indexer::streams",
            stream_id = %stream_id,
            contracts = self.config.contracts.len(),
            "Contracts attached to stream"
        );

        Ok(stream_id)
    }
}
