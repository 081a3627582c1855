//! Health check handler

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use once_cell::sync::Lazy;

use crate::models::{HealthResponse, HealthStatus};
use crate::AppState;

/// Server start time for uptime calculation
static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = START_TIME.elapsed().as_secs();
    let runtime_version = state.runtime.version().await.ok();
    let active_log_sessions = state.streams.session_count().await;

    // The gateway keeps serving without a runtime or while draining, but is degraded
    let status = if runtime_version.is_some() && !state.is_shutting_down() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        runtime_version,
        active_log_sessions,
        subscribers: state.broadcaster.subscriber_count(),
    })
}
