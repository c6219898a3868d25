//! Defines the HTTP routes and handlers for the operational surface.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::metrics::SchedulerMetrics;

/// Shared application state passed into route handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    metrics: Arc<SchedulerMetrics>,
}

impl AppState {
    /// Creates a new `AppState` instance.
    pub fn new(metrics: Arc<SchedulerMetrics>) -> Self {
        Self { metrics }
    }

    fn metrics(&self) -> &SchedulerMetrics {
        self.metrics.as_ref()
    }
}

/// Creates the operational router for the application.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/openapi.json", get(openapi_handler))
        .with_state(state)
}

/// Handler for the `/metrics` endpoint (Prometheus text exposition).
async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics().encode().map_err(|err| {
        tracing::error!(error = %err, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Handler for the `/health` liveness endpoint.
async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Handler serving a static description of the HTTP surface.
async fn openapi_handler() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.0",
        "info": {
            "title": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Operational surface of the swarm-based workload scheduler."
        },
        "paths": {
            "/health": {
                "get": { "summary": "Liveness probe", "responses": { "200": { "description": "Service is alive" } } }
            },
            "/metrics": {
                "get": { "summary": "Prometheus metrics", "responses": { "200": { "description": "Text exposition format" } } }
            },
            "/openapi.json": {
                "get": { "summary": "This document", "responses": { "200": { "description": "OpenAPI schema" } } }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_app() -> Router {
        let metrics = Arc::new(SchedulerMetrics::new().expect("metrics"));
        metrics.record_sweep();
        api_router(AppState::new(metrics))
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_the_exposition() {
        let response = test_app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("sweeps_total 1"));
    }

    #[tokio::test]
    async fn openapi_document_lists_the_surface() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/metrics"].is_object());
    }
}
