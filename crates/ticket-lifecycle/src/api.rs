//! HTTP handlers for openings and minting details
//!
//! The by-address lookups join against current ownership through
//! [`OwnershipIndex`], so a record follows the token when it changes hands.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use ticket_common::{normalize_address, normalize_token_id, ApiError, OwnershipIndex};

use crate::storage::{MintingDetails, OpeningRecord, TicketStorage};

/// Shared state for lifecycle routes
#[derive(Clone)]
pub struct LifecycleState {
    pub(crate) storage: Arc<TicketStorage>,
    pub(crate) ownership: Arc<dyn OwnershipIndex>,
}

fn parse_token_id(raw: &str) -> Result<String, ApiError> {
    normalize_token_id(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid token id: {raw}")))
}

fn parse_address(raw: &str) -> Result<String, ApiError> {
    normalize_address(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid address: {raw}")))
}

/// GET /openings/:tokenId
pub async fn openings_by_token_handler(
    State(state): State<LifecycleState>,
    Path(token_id): Path<String>,
) -> Result<Json<Vec<OpeningRecord>>, ApiError> {
    let token_id = parse_token_id(&token_id)?;
    Ok(Json(state.storage.get_openings_by_token(&token_id)?))
}

/// GET /address/:address/openings - openings of tokens the address holds now
pub async fn openings_by_address_handler(
    State(state): State<LifecycleState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<OpeningRecord>>, ApiError> {
    let address = parse_address(&address)?;
    let owned = state.ownership.owned_tokens(&address)?;
    Ok(Json(state.storage.get_openings_for_tokens(&owned)?))
}

/// GET /minting-details/:tokenId
pub async fn minting_details_handler(
    State(state): State<LifecycleState>,
    Path(token_id): Path<String>,
) -> Result<Json<MintingDetails>, ApiError> {
    let token_id = parse_token_id(&token_id)?;
    state
        .storage
        .get_minting_details(&token_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Minting details not found for token {token_id}")))
}

/// GET /address/:address/minting-details - details of any token id the address holds
pub async fn minting_details_by_address_handler(
    State(state): State<LifecycleState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<MintingDetails>>, ApiError> {
    let address = parse_address(&address)?;
    let token_ids: Vec<String> = state
        .ownership
        .owned_tokens(&address)?
        .into_iter()
        .map(|(_, token_id)| token_id)
        .collect();
    Ok(Json(state.storage.get_minting_details_for_tokens(&token_ids)?))
}

/// GET /minting-details
pub async fn all_minting_details_handler(
    State(state): State<LifecycleState>,
) -> Result<Json<Vec<MintingDetails>>, ApiError> {
    Ok(Json(state.storage.get_all_minting_details()?))
}

/// Build the lifecycle query routes
pub fn router(storage: Arc<TicketStorage>, ownership: Arc<dyn OwnershipIndex>) -> Router {
    let state = LifecycleState { storage, ownership };

    Router::new()
        .route("/openings/:token_id", get(openings_by_token_handler))
        .route("/address/:address/openings", get(openings_by_address_handler))
        .route("/minting-details", get(all_minting_details_handler))
        .route("/minting-details/:token_id", get(minting_details_handler))
        .route(
            "/address/:address/minting-details",
            get(minting_details_by_address_handler),
        )
        .with_state(state)
}
