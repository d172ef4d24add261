//! Route Configuration
//!
//! Configures the WebSocket endpoint and the operational HTTP routes.

use axum::{middleware, response::IntoResponse, routing::get, Router};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{operator_auth_middleware, track_http_metrics};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // WebSocket gateway endpoint; authentication happens in the handshake
        .route("/gateway", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_http_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API v1 routes (operators only)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/presence/users", get(handlers::presence::list_online_users))
        .route(
            "/presence/crews/{crew_id}",
            get(handlers::presence::list_crew_online),
        )
        .route("/gateway/stats", get(handlers::presence::gateway_stats))
        .route_layer(middleware::from_fn_with_state(state, operator_auth_middleware))
}
