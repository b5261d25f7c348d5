//! HTTP server routes.
//!
//! Core endpoints (health, test notification, webhook) live here; the token
//! and lifecycle crates contribute their own query routes, merged into one
//! router.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use ticket_common::OwnershipIndex;

use crate::context::AppContext;
use crate::engine_db::EngineStats;
use crate::notifier::{self, TEST_EVENT};
use crate::webhook::webhook_handler;

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineStats>,
}

/// Health check endpoint.
async fn health_handler(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let now = chrono::Utc::now().timestamp();
    let uptime = now - ctx.startup_time;

    let (database, engine) = match ctx.engine_db.ping().await {
        Ok(()) => ("connected".to_string(), ctx.engine_db.get_stats().await.ok()),
        Err(e) => {
            tracing::warn!(target: "ticket_indexer::http", error = %e, "Engine database check failed");
            ("unavailable".to_string(), None)
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: ctx.version.clone(),
        uptime_seconds: uptime,
        database,
        engine,
    })
}

/// Response of the test notification endpoint.
#[derive(Serialize, Deserialize)]
pub struct TestResponse {
    pub message: String,
    pub clients: usize,
}

/// Push a `TEST` notification to every connected observer.
async fn test_handler(State(ctx): State<Arc<AppContext>>) -> Json<TestResponse> {
    let delivered = ctx.notifier.publish(
        TEST_EVENT,
        json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
    );

    Json(TestResponse {
        message: "Test notification sent".to_string(),
        clients: delivered,
    })
}

/// Create the full HTTP router: core endpoints, query routes and the push channel.
pub fn create_http_router(ctx: Arc<AppContext>) -> Router {
    let ownership: Arc<dyn OwnershipIndex> = ctx.tokens.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route("/test", get(test_handler))
        .route("/webhook", post(webhook_handler))
        .with_state(ctx.clone())
        .merge(ticket_tokens::api::router(ctx.tokens.clone()))
        .merge(ticket_lifecycle::api::router(ctx.tickets.clone(), ownership))
        .merge(notifier::router(ctx.notifier.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContractAddresses;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn router() -> (Arc<AppContext>, Router) {
        let ctx = Arc::new(
            AppContext::in_memory(ContractAddresses::default())
                .await
                .unwrap(),
        );
        (ctx.clone(), create_http_router(ctx))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_, app) = router().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.database, "connected");
        let engine = health.engine.unwrap();
        assert_eq!(engine.processed_transactions, 0);
        assert_eq!(engine.last_block, None);
        assert!(!engine.start_time.is_empty());
        assert!(health.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_test_endpoint_reaches_observers() {
        let (ctx, app) = router().await;
        let mut rx = ctx.notifier.register_client("observer".to_string());

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let reply: TestResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.clients, 1);

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "TEST");
    }

    #[tokio::test]
    async fn test_query_routes_are_merged() {
        let (_, app) = router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/holders/erc721")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
