//! Operational surface of the gateway: WebSocket attach point, internal
//! notify endpoint, health and metrics.

pub mod error;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskio_realtime::{Notifier, SessionRegistry, StreamBridge};

pub use error::{AppError, AppResult};

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub notifier: Arc<Notifier>,
    pub bridge: Arc<StreamBridge>,
}

/// Assemble the full route table with CORS and request tracing applied.
pub fn create_router(
    registry: Arc<SessionRegistry>,
    notifier: Arc<Notifier>,
    bridge: Arc<StreamBridge>,
) -> Router {
    let state = AppState {
        registry,
        notifier,
        bridge,
    };

    Router::new()
        .merge(health::create_health_router())
        // WebSocket endpoint for live notifications
        .route(
            "/notifications/{user_id}",
            get(websocket::websocket_handler),
        )
        // Internal endpoint for collaborator services
        .route("/api/notify", post(notify::notify))
        // Prometheus text exposition
        .route("/metrics", get(metrics::metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        // with_state comes after the layers so they wrap every route
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use taskio_core::models::UserId;
    use taskio_core::Config;
    use tower::ServiceExt;

    fn test_router() -> (Router, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());

        // The directory is never queried by these routes; a client pointed
        // at a closed port satisfies the constructor.
        let directory = Arc::new(
            taskio_core::directory::HttpProjectDirectory::new(
                "http://127.0.0.1:1",
                std::time::Duration::from_secs(1),
            )
            .unwrap(),
        );
        let notifier = Arc::new(Notifier::new(registry.clone(), directory));

        // Unstarted bridge: publish fails, which the notify handler treats
        // as local-delivery-only.
        let config = Config::default();
        let bridge = Arc::new(StreamBridge::from_config(&config, "test".to_string()).unwrap());

        let router = create_router(registry.clone(), notifier, bridge);
        (router, registry)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_reports_registry_snapshot() {
        let (router, registry) = test_router();

        let alice = UserId::from_string("alice".to_string());
        let (_, _rx1) = registry.connect(alice.clone());
        let (_, _rx2) = registry.connect(alice);
        let (_, _rx3) = registry.connect(UserId::from_string("bob".to_string()));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 3);
        assert_eq!(body["users"], 2);
    }

    #[tokio::test]
    async fn test_notify_delivers_locally_even_when_broker_is_down() {
        let (router, registry) = test_router();
        let (_, mut rx) = registry.connect(UserId::from_string("u1".to_string()));

        let payload = json!({
            "users": ["u1"],
            "event": {
                "type": "task_updated",
                "project_id": "p1",
                "task": {"id": "t1", "title": "Ship it"}
            }
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notify")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Accepted despite the unreachable broker; local sessions were served.
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "task_updated");
        assert_eq!(
            event.payload.get("task").and_then(|t| t.get("title")),
            Some(&Value::String("Ship it".to_string()))
        );
    }

    #[tokio::test]
    async fn test_notify_rejects_empty_audience() {
        let (router, _) = test_router();

        let payload = json!({
            "users": [],
            "event": {"type": "task_updated", "project_id": "p1"}
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notify")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notify_rejects_malformed_body() {
        let (router, _) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notify")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{ not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_websocket_route_rejects_plain_http() {
        let (router, _) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/notifications/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let (router, registry) = test_router();
        // Touch a gauge so the exposition is guaranteed to include it.
        let (_, _rx) = registry.connect(UserId::from_string("u1".to_string()));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ws_sessions_active"));
    }
}
