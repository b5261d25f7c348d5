//! Webhook ingestion.
//!
//! `POST /webhook` always answers 200 so the provider never retries a
//! delivery; problems are reported in the logs and the response message.

pub mod payload;
pub mod processor;
pub mod updater;

use axum::{body::Bytes, extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::AppContext;
use payload::WebhookPayload;
pub use processor::{process_payload, WebhookOutcome};

/// Response body of `POST /webhook`
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
}

impl WebhookResponse {
    fn message(message: &str) -> Self {
        Self {
            message: message.to_string(),
            applied: None,
            skipped: None,
        }
    }
}

pub async fn webhook_handler(
    State(ctx): State<Arc<AppContext>>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                target: "ticket_indexer::webhook",
                error = %e,
                bytes = body.len(),
                "Unparseable webhook body"
            );
            return (
                StatusCode::OK,
                Json(WebhookResponse::message("Invalid payload ignored")),
            );
        }
    };

    if payload.confirmed {
        tracing::debug!(target: "ticket_indexer::webhook", "Skipping confirmed delivery");
        return (
            StatusCode::OK,
            Json(WebhookResponse::message("Skipped confirmed block")),
        );
    }

    tracing::info!(
        target: "ticket_indexer::webhook",
        chain_id = ?payload.chain_id,
        block = ?payload.block_number(),
        nft_transfers = payload.nft_transfers.len(),
        erc20_transfers = payload.erc20_transfers.len(),
        logs = payload.logs.len(),
        "Received webhook"
    );

    let outcome = process_payload(&ctx, &payload).await;

    tracing::info!(
        target: "ticket_indexer::webhook",
        applied = outcome.applied,
        skipped = outcome.skipped,
        "Webhook processed"
    );

    (
        StatusCode::OK,
        Json(WebhookResponse {
            message: "Webhook processed".to_string(),
            applied: Some(outcome.applied),
            skipped: Some(outcome.skipped),
        }),
    )
}
