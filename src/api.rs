//! HTTP routes besides the WebSocket endpoint.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::ws;

pub const HEALTH_RESPONSE: &str = "Server is running";

/// Liveness probe.
///
/// GET / and GET /health
pub async fn health() -> &'static str {
    HEALTH_RESPONSE
}

/// Full application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
