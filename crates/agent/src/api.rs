//! HTTP API for health checks, Prometheus metrics and buffer state

use agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    sync::DeliveryClient,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub client: Arc<DeliveryClient>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, client: Arc<DeliveryClient>) -> Self {
        Self {
            health_registry,
            client,
        }
    }
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Delivery buffer statistics
async fn buffer(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.client.buffer_stats().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/buffer", get(buffer))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_lib::health::components;
    use agent_lib::sync::DeliveryClientBuilder;
    use agent_lib::AgentMetrics;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state() -> Arc<AppState> {
        let health = HealthRegistry::new();
        health.register_all().await;
        // Never contacted; the buffer stays in memory
        let client = DeliveryClientBuilder::new()
            .base_url("http://127.0.0.1:9")
            .api_key("secret")
            .build()
            .unwrap();
        Arc::new(AppState::new(health, Arc::new(client)))
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_healthz_healthy() {
        let (status, body) = get(state().await, "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"].as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_healthz_degraded_is_still_ok() {
        let state = state().await;
        state
            .health_registry
            .set_degraded(components::DELIVERY, "Backend unreachable")
            .await;

        let (status, body) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_healthz_unhealthy() {
        let state = state().await;
        state
            .health_registry
            .set_unhealthy(components::BUFFER, "disk full")
            .await;

        let (status, _) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_transitions() {
        let state = state().await;

        let (status, body) = get(state.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);

        state.health_registry.set_ready(true).await;
        let (status, body) = get(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        AgentMetrics::new().set_buffer_items(0);

        let response = create_router(state().await)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("monitor_agent_buffer_items"));
    }

    #[tokio::test]
    async fn test_buffer_stats_endpoint() {
        let (status, body) = get(state().await, "/buffer").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], 0);
        assert_eq!(body["capacity"], 1000);
        assert!(body["oldest_timestamp"].is_null());
    }
}
