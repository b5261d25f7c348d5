//! Per-delivery pipeline: group by transaction, skip what was already
//! applied, apply transfers then logs, mark the transaction processed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use ticket_common::{timestamp_from_secs, TokenClass};
use ticket_lifecycle::Match;

use crate::context::AppContext;
use crate::engine_db::MarkOutcome;
use crate::webhook::payload::{
    ContractLog, Erc20TransferEntry, FungibleTransfer, LogEntry, NftTransfer, NftTransferEntry,
    WebhookPayload,
};
use crate::webhook::updater::EventOrigin;

/// Summary of one delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    /// Transactions whose effects were applied by this delivery
    pub applied: usize,
    /// Transactions skipped because they were already applied
    pub skipped: usize,
}

/// Everything one transaction contributed to a delivery
#[derive(Debug, Default)]
struct TxBatch {
    tx_hash: String,
    nft_transfers: Vec<NftTransfer>,
    fungible_transfers: Vec<FungibleTransfer>,
    logs: Vec<ContractLog>,
}

/// Transactions in order of first appearance
#[derive(Default)]
struct TxBatches {
    order: Vec<TxBatch>,
    index: HashMap<String, usize>,
}

impl TxBatches {
    fn entry(&mut self, tx_hash: &str) -> &mut TxBatch {
        let position = match self.index.get(tx_hash) {
            Some(&position) => position,
            None => {
                self.order.push(TxBatch {
                    tx_hash: tx_hash.to_string(),
                    ..Default::default()
                });
                self.index.insert(tx_hash.to_string(), self.order.len() - 1);
                self.order.len() - 1
            }
        };
        &mut self.order[position]
    }
}

/// Validate every item and group them by transaction. Malformed items are
/// dropped with a warning.
fn group_by_transaction(payload: &WebhookPayload) -> Vec<TxBatch> {
    let mut batches = TxBatches::default();

    for entry in &payload.nft_transfers {
        match entry.get().and_then(NftTransferEntry::to_transfer) {
            Ok(transfer) => batches.entry(&transfer.tx_hash.clone()).nft_transfers.push(transfer),
            Err(e) => {
                tracing::warn!(target: "ticket_indexer::webhook", error = %e, "Skipping malformed NFT transfer");
            }
        }
    }

    for entry in &payload.erc20_transfers {
        match entry.get().and_then(Erc20TransferEntry::to_transfer) {
            Ok(transfer) => batches
                .entry(&transfer.tx_hash.clone())
                .fungible_transfers
                .push(transfer),
            Err(e) => {
                tracing::warn!(target: "ticket_indexer::webhook", error = %e, "Skipping malformed fungible transfer");
            }
        }
    }

    for entry in &payload.logs {
        match entry.get().and_then(LogEntry::to_log) {
            Ok(log) => batches.entry(&log.tx_hash.clone()).logs.push(log),
            Err(e) => {
                tracing::warn!(target: "ticket_indexer::webhook", error = %e, "Skipping malformed log");
            }
        }
    }

    batches.order
}

/// Apply an unconfirmed delivery to the stores.
///
/// Failures of individual items are logged and do not stop the delivery;
/// effects already applied are kept.
pub async fn process_payload(ctx: &AppContext, payload: &WebhookPayload) -> WebhookOutcome {
    let timestamp = payload
        .block_timestamp()
        .and_then(timestamp_from_secs)
        .unwrap_or_else(Utc::now);

    let mut outcome = WebhookOutcome::default();

    for batch in group_by_transaction(payload) {
        match ctx.engine_db.already_processed(&batch.tx_hash).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(
                    target: "ticket_indexer::webhook",
                    tx_hash = %batch.tx_hash,
                    "Transaction already processed"
                );
                outcome.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::error!(
                    target: "ticket_indexer::webhook",
                    tx_hash = %batch.tx_hash,
                    error = %e,
                    "Failed to check processed transactions"
                );
                continue;
            }
        }

        apply_batch(ctx, &batch, timestamp);

        match ctx.engine_db.mark_processed(&batch.tx_hash).await {
            Ok(MarkOutcome::Marked) => outcome.applied += 1,
            Ok(MarkOutcome::AlreadyProcessed) => {
                tracing::warn!(
                    target: "ticket_indexer::webhook",
                    tx_hash = %batch.tx_hash,
                    "Transaction was marked by a concurrent delivery"
                );
                outcome.skipped += 1;
            }
            Err(e) => {
                tracing::error!(
                    target: "ticket_indexer::webhook",
                    tx_hash = %batch.tx_hash,
                    error = %e,
                    "Failed to mark transaction as processed"
                );
            }
        }
    }

    if let Some(block) = payload.block_number() {
        if let Err(e) = ctx.engine_db.set_stat("last_block", &block.to_string()).await {
            tracing::warn!(target: "ticket_indexer::webhook", error = %e, "Failed to record last block");
        }
    }

    outcome
}

fn apply_batch(ctx: &AppContext, batch: &TxBatch, timestamp: DateTime<Utc>) {
    // Repeated ids on the hybrid contract within one transaction are reported
    // once per transfer leg; only the first is applied
    let mut seen_erc404 = HashSet::new();

    for transfer in &batch.nft_transfers {
        if ctx.updater.classify(&transfer.contract) == Some(TokenClass::Erc404)
            && !seen_erc404.insert(transfer.token_id.as_str())
        {
            tracing::debug!(
                target: "ticket_indexer::webhook",
                tx_hash = %batch.tx_hash,
                token_id = %transfer.token_id,
                "Dropping repeated ERC404 token id"
            );
            continue;
        }

        if let Err(e) = ctx.updater.apply_nft_transfer(transfer) {
            tracing::error!(
                target: "ticket_indexer::webhook",
                tx_hash = %batch.tx_hash,
                token_id = %transfer.token_id,
                error = %e,
                "Failed to apply NFT transfer"
            );
        }
    }

    for transfer in &batch.fungible_transfers {
        if let Err(e) = ctx.updater.apply_fungible_transfer(transfer) {
            tracing::error!(
                target: "ticket_indexer::webhook",
                tx_hash = %batch.tx_hash,
                error = %e,
                "Failed to apply fungible transfer"
            );
        }
    }

    for log in &batch.logs {
        let event = match ctx.decoder.decode(&log.raw) {
            Match::Matched(event) => event,
            Match::Unmatched => {
                tracing::debug!(
                    target: "ticket_indexer::webhook",
                    tx_hash = %batch.tx_hash,
                    address = %log.raw.address,
                    log_index = ?log.log_index,
                    "Log matched no known event"
                );
                continue;
            }
        };

        let origin = EventOrigin {
            contract: &log.raw.address,
            tx_hash: &batch.tx_hash,
            timestamp,
        };
        if let Err(e) = ctx.updater.apply_event(&event, origin) {
            tracing::error!(
                target: "ticket_indexer::webhook",
                tx_hash = %batch.tx_hash,
                event = event.name(),
                error = %e,
                "Failed to apply event"
            );
        }
    }
}
