//! Applies validated transfers and decoded events to the stores.
//!
//! Every minting details mutation is followed by exactly one
//! `MINTING_DETAILS_UPDATED` notification.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use ticket_common::TokenClass;
use ticket_lifecycle::{TicketEvent, TicketStorage};
use ticket_tokens::TokenStorage;

use crate::context::ContractAddresses;
use crate::notifier::{Notifier, MINTING_DETAILS_UPDATED};
use crate::webhook::payload::{FungibleTransfer, NftTransfer};

/// Where a decoded event came from
#[derive(Debug, Clone, Copy)]
pub struct EventOrigin<'a> {
    pub contract: &'a str,
    pub tx_hash: &'a str,
    pub timestamp: DateTime<Utc>,
}

pub struct StateUpdater {
    tokens: Arc<TokenStorage>,
    tickets: Arc<TicketStorage>,
    notifier: Notifier,
    contracts: ContractAddresses,
}

impl StateUpdater {
    pub fn new(
        tokens: Arc<TokenStorage>,
        tickets: Arc<TicketStorage>,
        notifier: Notifier,
        contracts: ContractAddresses,
    ) -> Self {
        Self {
            tokens,
            tickets,
            notifier,
            contracts,
        }
    }

    /// Token class of a transfer, decided by the emitting contract
    pub fn classify(&self, contract: &str) -> Option<TokenClass> {
        self.contracts.classify(contract)
    }

    /// Apply an ownership change. Returns `false` for untracked contracts.
    pub fn apply_nft_transfer(&self, transfer: &NftTransfer) -> Result<bool> {
        let Some(class) = self.classify(&transfer.contract) else {
            tracing::debug!(
                target: "ticket_indexer::updater",
                contract = %transfer.contract,
                "Ignoring NFT transfer from untracked contract"
            );
            return Ok(false);
        };

        self.tokens.apply_token_transfer(
            class,
            &transfer.token_id,
            &transfer.from,
            &transfer.to,
            &transfer.tx_hash,
        )?;

        tracing::debug!(
            target: "ticket_indexer::updater",
            class = %class,
            token_id = %transfer.token_id,
            from = %transfer.from,
            to = %transfer.to,
            "Applied NFT transfer"
        );
        Ok(true)
    }

    /// Apply a fungible transfer of the hybrid contract. Returns `false` for
    /// any other contract.
    pub fn apply_fungible_transfer(&self, transfer: &FungibleTransfer) -> Result<bool> {
        if self.classify(&transfer.contract) != Some(TokenClass::Erc404) {
            tracing::debug!(
                target: "ticket_indexer::updater",
                contract = %transfer.contract,
                "Ignoring fungible transfer from untracked contract"
            );
            return Ok(false);
        }

        self.tokens
            .apply_fungible_transfer(&transfer.from, &transfer.to, &transfer.amount)?;

        tracing::debug!(
            target: "ticket_indexer::updater",
            from = %transfer.from,
            to = %transfer.to,
            amount = %transfer.amount,
            "Applied fungible transfer"
        );
        Ok(true)
    }

    /// Whether logs from `contract` are applied. With no contracts configured
    /// every emitter is accepted.
    pub fn tracks_emitter(&self, contract: &str) -> bool {
        (self.contracts.erc404.is_none() && self.contracts.erc721.is_none())
            || self.classify(contract).is_some()
    }

    /// Apply one decoded catalog event. Returns `false` when the emitter is
    /// not a tracked contract.
    pub fn apply_event(&self, event: &TicketEvent, origin: EventOrigin<'_>) -> Result<bool> {
        if !self.tracks_emitter(origin.contract) {
            tracing::debug!(
                target: "ticket_indexer::updater",
                contract = %origin.contract,
                event = event.name(),
                "Ignoring event from untracked contract"
            );
            return Ok(false);
        }

        match event {
            TicketEvent::Minted {
                token_id,
                owner,
                levels,
            } => {
                self.tickets.upsert_minting_levels(
                    token_id,
                    origin.tx_hash,
                    levels,
                    origin.timestamp,
                )?;
                tracing::info!(
                    target: "ticket_indexer::updater",
                    token_id = %token_id,
                    owner = %owner,
                    levels = levels.len(),
                    "Ticket minted"
                );
                self.minting_details_updated(token_id);
            }
            TicketEvent::OpeningInitiated {
                token_id,
                opener,
                request_id,
            } => {
                let class = if self.classify(origin.contract) == Some(TokenClass::Erc404) {
                    TokenClass::Erc404
                } else {
                    TokenClass::Erc721
                };
                self.tickets.record_opening(
                    token_id,
                    opener,
                    origin.tx_hash,
                    class,
                    origin.timestamp,
                )?;
                tracing::info!(
                    target: "ticket_indexer::updater",
                    token_id = %token_id,
                    opener = %opener,
                    request_id = %request_id,
                    class = %class,
                    "Ticket opening initiated"
                );
            }
            TicketEvent::Resolved {
                token_id,
                roll_result,
                win_amount,
            } => {
                self.tickets.record_resolution(
                    token_id,
                    origin.tx_hash,
                    *roll_result,
                    win_amount,
                    origin.timestamp,
                )?;
                tracing::info!(
                    target: "ticket_indexer::updater",
                    token_id = %token_id,
                    roll_result,
                    win_amount = %win_amount,
                    "Ticket resolved"
                );
                self.minting_details_updated(token_id);
            }
            TicketEvent::RewardPaid {
                token_id,
                winner,
                roll_result,
                amount,
            } => {
                self.tickets.record_resolution(
                    token_id,
                    origin.tx_hash,
                    *roll_result,
                    amount,
                    origin.timestamp,
                )?;
                tracing::info!(
                    target: "ticket_indexer::updater",
                    token_id = %token_id,
                    winner = %winner,
                    amount = %amount,
                    "Reward paid"
                );
                self.minting_details_updated(token_id);
            }
            TicketEvent::PoolDeposited { depositor, amount } => {
                tracing::info!(
                    target: "ticket_indexer::updater",
                    depositor = %depositor,
                    amount = %amount,
                    "Pool deposit"
                );
            }
            TicketEvent::PoolWithdrawn { recipient, amount } => {
                tracing::info!(
                    target: "ticket_indexer::updater",
                    recipient = %recipient,
                    amount = %amount,
                    "Pool withdrawal"
                );
            }
        }
        Ok(true)
    }

    fn minting_details_updated(&self, token_id: &str) {
        self.notifier
            .publish(MINTING_DETAILS_UPDATED, json!({ "tokenId": token_id }));
    }
}
