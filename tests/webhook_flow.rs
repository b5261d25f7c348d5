//! End-to-end webhook deliveries through the HTTP router.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use ticket_common::TokenClass;
use ticket_indexer::http::create_http_router;
use ticket_indexer::{AppContext, ContractAddresses};
use ticket_lifecycle::decoder::ITicketGame;
use tower::ServiceExt;

const ERC404: &str = "0x0000000000000000000000000000000000000404";
const ERC721: &str = "0x0000000000000000000000000000000000000721";
const ZERO: &str = "0x0000000000000000000000000000000000000000";
const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b0";

async fn setup() -> (Arc<AppContext>, Router) {
    let contracts = ContractAddresses::new(Some(ERC404), Some(ERC721)).unwrap();
    let ctx = Arc::new(AppContext::in_memory(contracts).await.unwrap());
    (ctx.clone(), create_http_router(ctx))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn post_webhook(app: &Router, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

fn delivery(confirmed: bool) -> Value {
    json!({
        "confirmed": confirmed,
        "chainId": "0x1",
        "block": { "number": "100", "hash": "0xbb", "timestamp": "1700000000" },
        "logs": [],
        "erc20Transfers": [],
        "nftTransfers": []
    })
}

fn nft_transfer(tx: &str, contract: &str, from: &str, to: &str, token_id: &str) -> Value {
    json!({
        "transactionHash": tx,
        "contract": contract,
        "from": from,
        "to": to,
        "tokenId": token_id
    })
}

fn erc20_transfer(tx: &str, from: &str, to: &str, value: &str) -> Value {
    json!({
        "transactionHash": tx,
        "contract": ERC404,
        "from": from,
        "to": to,
        "value": value
    })
}

fn hex_word(word: B256) -> String {
    format!("0x{}", hex::encode(word))
}

fn log_entry(tx: &str, index: u64, topics: &[B256], data: &[u8]) -> Value {
    let mut entry = json!({
        "logIndex": index.to_string(),
        "transactionHash": tx,
        "address": ERC404,
        "data": format!("0x{}", hex::encode(data)),
    });
    for (i, topic) in topics.iter().enumerate() {
        entry[format!("topic{i}")] = json!(hex_word(*topic));
    }
    entry
}

fn minted(tx: &str, token_id: u64, owner: &str, levels: &[(u64, u64)]) -> Value {
    let owner: Address = owner.parse().unwrap();
    let event = ITicketGame::TicketMinted {
        tokenId: U256::from(token_id),
        owner,
        levels: levels
            .iter()
            .map(|(win, roll)| ITicketGame::Level {
                winAmount: U256::from(*win),
                rollNumber: U256::from(*roll),
            })
            .collect(),
    };
    log_entry(
        tx,
        0,
        &[
            ITicketGame::TicketMinted::SIGNATURE_HASH,
            B256::from(U256::from(token_id)),
            owner.into_word(),
        ],
        &event.encode_data(),
    )
}

fn resolved(tx: &str, token_id: u64, roll: u64, win: u64) -> Value {
    let event = ITicketGame::TicketResolved {
        tokenId: U256::from(token_id),
        rollResult: U256::from(roll),
        winAmount: U256::from(win),
    };
    log_entry(
        tx,
        1,
        &[
            ITicketGame::TicketResolved::SIGNATURE_HASH,
            B256::from(U256::from(token_id)),
        ],
        &event.encode_data(),
    )
}

#[tokio::test]
async fn replayed_delivery_is_applied_once() {
    let (ctx, app) = setup().await;

    let mut payload = delivery(false);
    payload["nftTransfers"] = json!([nft_transfer("0x01", ERC721, ZERO, ALICE, "5")]);
    payload["erc20Transfers"] = json!([erc20_transfer("0x01", ZERO, ALICE, "1000")]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);
    assert_eq!(body["skipped"], 0);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 0);
    assert_eq!(body["skipped"], 1);

    assert_eq!(ctx.engine_db.processed_count().await.unwrap(), 1);
    assert_eq!(ctx.tokens.get_balance(ALICE).unwrap().as_deref(), Some("1000"));
    assert_eq!(
        ctx.tokens.get_owner(TokenClass::Erc721, "5").unwrap().as_deref(),
        Some(ALICE)
    );

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["engine"]["processed_transactions"], 1);
    assert_eq!(health["engine"]["last_block"], 100);
}

#[tokio::test]
async fn mistyped_entry_skips_only_itself() {
    let (ctx, app) = setup().await;

    let mut payload = delivery(false);
    payload["nftTransfers"] = json!([
        nft_transfer("0x01", ERC721, ZERO, ALICE, "5"),
        { "transactionHash": "0x01", "contract": ERC721, "from": ZERO, "to": 123, "tokenId": "6" },
        null
    ]);
    payload["erc20Transfers"] = json!([
        erc20_transfer("0x02", ZERO, BOB, "-1000"),
        erc20_transfer("0x02", ZERO, ALICE, "70")
    ]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Webhook processed");
    assert_eq!(body["applied"], 2);

    assert_eq!(
        ctx.tokens.get_owner(TokenClass::Erc721, "5").unwrap().as_deref(),
        Some(ALICE)
    );
    assert_eq!(ctx.tokens.get_owner(TokenClass::Erc721, "6").unwrap(), None);
    assert_eq!(ctx.tokens.get_balance(BOB).unwrap(), None);
    assert_eq!(ctx.tokens.get_balance(ALICE).unwrap().as_deref(), Some("70"));
}

#[tokio::test]
async fn failed_item_does_not_stop_the_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let contracts = ContractAddresses::new(Some(ERC404), Some(ERC721)).unwrap();
    let ctx = Arc::new(AppContext::open(dir.path(), contracts).await.unwrap());
    let app = create_http_router(ctx.clone());

    // Openings can no longer be written
    let side = rusqlite::Connection::open(dir.path().join("tickets.db")).unwrap();
    side.execute("DROP TABLE openings", []).unwrap();
    drop(side);

    let opener: Address = ALICE.parse().unwrap();
    let opening = ITicketGame::TicketOpeningInitiated {
        tokenId: U256::from(42),
        opener,
        requestId: U256::from(1),
    };

    let mut payload = delivery(false);
    payload["logs"] = json!([
        log_entry(
            "0x0e",
            0,
            &[
                ITicketGame::TicketOpeningInitiated::SIGNATURE_HASH,
                B256::from(U256::from(42)),
                opener.into_word(),
            ],
            &opening.encode_data(),
        ),
        minted("0x0e", 42, ALICE, &[(100, 1)]),
    ]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);

    assert!(ctx.tickets.get_minting_details("42").unwrap().is_some());
    assert_eq!(ctx.engine_db.processed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn logs_from_untracked_contracts_are_ignored() {
    let (ctx, app) = setup().await;

    let mut entry = minted("0x0f", 11, ALICE, &[(1, 1)]);
    entry["address"] = json!("0x00000000000000000000000000000000000000ff");
    let mut payload = delivery(false);
    payload["logs"] = json!([entry]);

    let (status, _) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ctx.tickets.get_minting_details("11").unwrap().is_none());
}

#[tokio::test]
async fn confirmed_delivery_is_skipped() {
    let (ctx, app) = setup().await;

    let mut payload = delivery(true);
    payload["nftTransfers"] = json!([nft_transfer("0x01", ERC721, ZERO, ALICE, "5")]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Skipped confirmed block");

    assert_eq!(ctx.engine_db.processed_count().await.unwrap(), 0);
    assert_eq!(ctx.tokens.get_owner(TokenClass::Erc721, "5").unwrap(), None);
}

#[tokio::test]
async fn unparseable_body_still_answers_ok() {
    let (_, app) = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn repeated_erc404_token_in_one_transaction_applies_first_only() {
    let (ctx, app) = setup().await;

    let mut payload = delivery(false);
    payload["nftTransfers"] = json!([
        nft_transfer("0x01", ERC404, ZERO, ALICE, "9"),
        nft_transfer("0x01", ERC404, ALICE, BOB, "9"),
        nft_transfer("0x01", ERC721, ZERO, ALICE, "9"),
        nft_transfer("0x01", ERC721, ALICE, BOB, "9"),
    ]);

    let (status, _) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        ctx.tokens.get_owner(TokenClass::Erc404, "9").unwrap().as_deref(),
        Some(ALICE)
    );
    // the plain NFT class is not de-duplicated
    assert_eq!(
        ctx.tokens.get_owner(TokenClass::Erc721, "9").unwrap().as_deref(),
        Some(BOB)
    );
}

#[tokio::test]
async fn transfer_leaves_exactly_one_owner() {
    let (ctx, app) = setup().await;

    let mut mint = delivery(false);
    mint["nftTransfers"] = json!([nft_transfer("0x01", ERC721, ZERO, ALICE, "3")]);
    post_webhook(&app, &mint).await;

    let mut transfer = delivery(false);
    transfer["nftTransfers"] = json!([nft_transfer("0x02", ERC721, ALICE, BOB, "3")]);
    post_webhook(&app, &transfer).await;

    assert_eq!(
        ctx.tokens.get_distinct_owners(TokenClass::Erc721).unwrap(),
        vec![BOB.to_string()]
    );

    let (_, holdings) = get(&app, &format!("/holdings/{ALICE}")).await;
    assert_eq!(holdings["erc721"], json!([]));
    let (_, holdings) = get(&app, &format!("/holdings/{BOB}")).await;
    assert_eq!(holdings["erc721"], json!(["3"]));
}

#[tokio::test]
async fn mint_then_resolve_accumulates_minting_details() {
    let (ctx, app) = setup().await;
    let mut observer = ctx.notifier.register_client("observer".to_string());

    let mut payload = delivery(false);
    payload["logs"] = json!([
        minted("0x0a", 42, ALICE, &[(100, 1), (5000, 2)]),
        resolved("0x0a", 42, 2, 5000),
    ]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);

    let (status, details) = get(&app, "/minting-details/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        details["levels"],
        json!([
            { "winAmount": "100", "rollNumber": 1 },
            { "winAmount": "5000", "rollNumber": 2 }
        ])
    );
    assert_eq!(details["rollResult"], 2);
    assert_eq!(details["payout"], "5000");
    assert_eq!(details["transactionHash"], "0x0a");
    assert_eq!(details["timestamp"], "2023-11-14T22:13:20.000Z");

    for _ in 0..2 {
        let frame: Value = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "MINTING_DETAILS_UPDATED");
        assert_eq!(frame["data"]["tokenId"], "42");
    }
}

#[tokio::test]
async fn unknown_logs_are_ignored() {
    let (ctx, app) = setup().await;

    let mut payload = delivery(false);
    payload["logs"] = json!([log_entry(
        "0x0b",
        0,
        &[B256::repeat_byte(0x77)],
        &[0u8; 32]
    )]);

    let (status, body) = post_webhook(&app, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);
    assert!(ctx.tickets.get_all_minting_details().unwrap().is_empty());
}

#[tokio::test]
async fn empty_holdings_shape() {
    let (_, app) = setup().await;

    let (status, body) = get(&app, &format!("/holdings/{ALICE}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "erc404": { "fungible": "0", "nfts": [] }, "erc721": [] })
    );
}

#[tokio::test]
async fn openings_follow_current_owner() {
    let (_, app) = setup().await;

    let opener: Address = ALICE.parse().unwrap();
    let opening = ITicketGame::TicketOpeningInitiated {
        tokenId: U256::from(8),
        opener,
        requestId: U256::from(1),
    };

    let mut payload = delivery(false);
    payload["nftTransfers"] = json!([nft_transfer("0x0c", ERC404, ZERO, ALICE, "8")]);
    payload["logs"] = json!([log_entry(
        "0x0c",
        2,
        &[
            ITicketGame::TicketOpeningInitiated::SIGNATURE_HASH,
            B256::from(U256::from(8)),
            opener.into_word(),
        ],
        &opening.encode_data(),
    )]);
    post_webhook(&app, &payload).await;

    let (_, openings) = get(&app, &format!("/address/{ALICE}/openings")).await;
    assert_eq!(openings.as_array().unwrap().len(), 1);
    assert_eq!(openings[0]["tokenClass"], "ERC404");

    let mut transfer = delivery(false);
    transfer["nftTransfers"] = json!([nft_transfer("0x0d", ERC404, ALICE, BOB, "8")]);
    post_webhook(&app, &transfer).await;

    let (_, openings) = get(&app, &format!("/address/{ALICE}/openings")).await;
    assert_eq!(openings, json!([]));
    let (_, openings) = get(&app, &format!("/address/{BOB}/openings")).await;
    assert_eq!(openings[0]["openerAddress"], ALICE);
}
