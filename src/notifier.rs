//! Push notifications to connected observers.
//!
//! Observers are WebSocket clients held in an explicit registry. A publish
//! serializes `{type, data}` once and hands the frame to every client's
//! bounded channel; delivery is fire-and-forget with no replay.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Emitted after every minting details mutation
pub const MINTING_DETAILS_UPDATED: &str = "MINTING_DETAILS_UPDATED";
/// Emitted by the `/test` endpoint
pub const TEST_EVENT: &str = "TEST";

/// Per-client buffer; a slower client misses frames instead of stalling publishers
const CLIENT_BUFFER: usize = 256;

/// Wire frame pushed to observers
#[derive(Debug, Serialize)]
struct Notification<'a, T: Serialize> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: T,
}

/// Registry of connected observers
#[derive(Clone, Default)]
pub struct Notifier {
    /// Mapping of client IDs to their outbound frame channel
    clients: Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer and return the receiving end of its channel
    pub fn register_client(&self, client_id: String) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        match self.clients.write() {
            Ok(mut clients) => {
                clients.insert(client_id.clone(), tx);
            }
            Err(_) => {
                tracing::error!(target: "ticket_indexer::notifier", "Client registry lock poisoned");
            }
        }
        tracing::info!(target: "ticket_indexer::notifier", client_id = %client_id, "Client registered");
        rx
    }

    pub fn unregister_client(&self, client_id: &str) {
        if let Ok(mut clients) = self.clients.write() {
            clients.remove(client_id);
        }
        tracing::info!(target: "ticket_indexer::notifier", client_id = %client_id, "Client unregistered");
    }

    /// Number of connected observers
    pub fn client_count(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Deliver `{type, data}` to every observer. Returns how many accepted it.
    pub fn publish<T: Serialize>(&self, event_type: &str, data: T) -> usize {
        let frame = match serde_json::to_string(&Notification { event_type, data }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(
                    target: "ticket_indexer::notifier",
                    event_type = %event_type,
                    error = %e,
                    "Failed to serialize notification"
                );
                return 0;
            }
        };

        let Ok(clients) = self.clients.read() else {
            tracing::error!(target: "ticket_indexer::notifier", "Client registry lock poisoned");
            return 0;
        };

        let mut delivered = 0;
        for (client_id, tx) in clients.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        target: "ticket_indexer::notifier",
                        client_id = %client_id,
                        error = %e,
                        "Skipped observer"
                    );
                }
            }
        }

        tracing::debug!(
            target: "ticket_indexer::notifier",
            event_type = %event_type,
            delivered,
            "Published notification"
        );

        delivered
    }
}

async fn ws_handler(State(notifier): State<Notifier>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, notifier))
}

/// Forward frames to the client until either side goes away. Inbound frames
/// other than ping and close are ignored.
async fn handle_socket(socket: WebSocket, notifier: Notifier) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let mut frames = notifier.register_client(client_id.clone());
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            target: "ticket_indexer::notifier",
                            client_id = %client_id,
                            error = %e,
                            "WebSocket error"
                        );
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame)).await.is_err() {
                    tracing::debug!(
                        target: "ticket_indexer::notifier",
                        client_id = %client_id,
                        "Failed to send frame, client disconnected"
                    );
                    break;
                }
            }
        }
    }

    notifier.unregister_client(&client_id);
    let _ = sender.close().await;
}

/// `GET /ws` push channel
pub fn router(notifier: Notifier) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(notifier)
}
