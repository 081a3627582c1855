//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring the gateway

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::models::CommandOutcome;
use crate::AppState;

/// Prometheus metrics recorder
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder
pub fn init_metrics() -> Result<()> {
    METRICS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")
    })?;
    Ok(())
}

/// Record a registry poll
pub fn record_poll(success: bool) {
    let result = if success { "ok" } else { "skipped" };
    counter!("fleet_registry_polls_total", "result" => result).increment(1);
}

/// Record a flushed log batch
pub fn record_log_batch(lines: usize) {
    counter!("fleet_log_batches_total").increment(1);
    counter!("fleet_log_lines_total").increment(lines as u64);
}

/// Record the number of live log sessions
pub fn set_active_log_sessions(count: usize) {
    gauge!("fleet_log_sessions_active").set(count as f64);
}

/// Record a dispatched command and the event it produced
pub fn record_command(command: &'static str, outcome: &CommandOutcome) {
    counter!("fleet_commands_total", "command" => command, "outcome" => outcome.event_name())
        .increment(1);

    if outcome.is_failure() {
        counter!("fleet_command_failures_total", "command" => command).increment(1);
    }
}

/// Record the number of connected subscribers
pub fn set_subscribers(count: usize) {
    gauge!("fleet_subscribers").set(count as f64);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    set_subscribers(state.broadcaster.subscriber_count());

    match METRICS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
