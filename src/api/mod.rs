//! API module for Fleet Gateway
//!
//! Provides:
//! - The subscriber WebSocket (`/ws`)
//! - Read-only REST views of the registry and log sessions
//! - Health and metrics endpoints

mod error;
mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Subscriber WebSocket
        .route("/ws", get(handlers::gateway::gateway_websocket_handler))
        // API v1 routes
        .nest("/api/v1", api_v1_routes());

    if state.config.metrics.enabled {
        router = router.route(
            &state.config.metrics.path,
            get(crate::metrics::metrics_handler),
        );
    }

    router.with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/containers", get(handlers::containers::list_containers))
        .route("/containers/:id", get(handlers::containers::get_container))
        .route("/streams", get(handlers::containers::list_streams))
}
