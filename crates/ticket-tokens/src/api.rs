//! HTTP handlers for balance and ownership lookups

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticket_common::{normalize_address, ApiError, TokenClass};

use crate::storage::TokenStorage;

/// Shared state for token routes
#[derive(Clone)]
pub struct TokensState {
    pub(crate) storage: Arc<TokenStorage>,
}

/// Holdings of the hybrid contract
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc404Holdings {
    pub fungible: String,
    pub nfts: Vec<String>,
}

/// Response for `GET /holdings/:address`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldingsResponse {
    pub erc404: Erc404Holdings,
    pub erc721: Vec<String>,
}

/// Holder category accepted by `GET /holders/:tokenType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderKind {
    Erc404Fungible,
    Erc404Nft,
    Erc721,
}

impl HolderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "erc404-fungible" => Some(Self::Erc404Fungible),
            "erc404-nft" => Some(Self::Erc404Nft),
            "erc721" => Some(Self::Erc721),
            _ => None,
        }
    }
}

/// GET /holdings/:address - fungible balance and token ids held by an address
pub async fn holdings_handler(
    State(state): State<TokensState>,
    Path(address): Path<String>,
) -> Result<Json<HoldingsResponse>, ApiError> {
    let address = normalize_address(&address)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid address: {address}")))?;

    let fungible = state
        .storage
        .get_balance(&address)?
        .unwrap_or_else(|| "0".to_string());
    let nfts = state
        .storage
        .get_owned_token_ids(TokenClass::Erc404, &address)?;
    let erc721 = state
        .storage
        .get_owned_token_ids(TokenClass::Erc721, &address)?;

    tracing::debug!(
        target: "ticket_tokens::api",
        address = %address,
        erc404_nfts = nfts.len(),
        erc721 = erc721.len(),
        "Served holdings"
    );

    Ok(Json(HoldingsResponse {
        erc404: Erc404Holdings { fungible, nfts },
        erc721,
    }))
}

/// GET /holders/:tokenType - addresses holding a token category
pub async fn holders_handler(
    State(state): State<TokensState>,
    Path(token_type): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let kind = HolderKind::parse(&token_type)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid token type: {token_type}")))?;

    let holders = match kind {
        HolderKind::Erc404Fungible => state.storage.get_positive_balance_holders()?,
        HolderKind::Erc404Nft => state.storage.get_distinct_owners(TokenClass::Erc404)?,
        HolderKind::Erc721 => state.storage.get_distinct_owners(TokenClass::Erc721)?,
    };

    Ok(Json(holders))
}

/// Build the token query routes
pub fn router(storage: Arc<TokenStorage>) -> Router {
    let state = TokensState { storage };

    Router::new()
        .route("/holdings/:address", get(holdings_handler))
        .route("/holders/:token_type", get(holders_handler))
        .with_state(state)
}
