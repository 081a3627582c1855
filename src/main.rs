//! Fleet Gateway - real-time observation and control of a host's containers
//!
//! This is the main entry point for the gateway service.
//! It polls the container runtime and serves subscribers over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderName;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use fleet_gateway::api::create_router;
use fleet_gateway::config::AppConfig;
use fleet_gateway::logging::init_logging;
use fleet_gateway::runtime::{DockerRuntime, RuntimeClient};
use fleet_gateway::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, config.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Fleet Gateway"
    );

    // Initialize metrics system
    if config.metrics.enabled {
        fleet_gateway::metrics::init_metrics()?;
        info!(path = %config.metrics.path, "Prometheus metrics initialized");
    }

    // Connect to the container runtime
    let runtime: Arc<dyn RuntimeClient> = Arc::new(DockerRuntime::connect(
        config.docker_host.as_deref(),
        config.runtime_timeout_seconds,
    )?);

    match runtime.version().await {
        Ok(version) => info!(version = %version, "Container runtime reachable"),
        Err(e) => warn!(error = %e, "Container runtime not reachable yet, polling will retry"),
    }

    // Create shared application state
    let state = Arc::new(AppState::new(config.clone(), runtime));

    // Start registry polling
    let registry = state.registry.clone();
    let poll_shutdown = state.shutdown_receiver();
    let poller = tokio::spawn(async move {
        registry.run(poll_shutdown).await;
    });

    // Refresh on runtime events between polls
    let event_watcher = if config.registry.watch_runtime_events {
        let registry = state.registry.clone();
        let events_shutdown = state.shutdown_receiver();
        Some(tokio::spawn(async move {
            registry.watch_runtime_events(events_shutdown).await;
        }))
    } else {
        None
    };

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown; subscriber sockets close on the same signal
    let signal_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down...");
            signal_state.begin_shutdown();
        })
        .await?;

    if let Err(e) = poller.await {
        error!(error = %e, "Registry poller ended abnormally");
    }
    if let Some(handle) = event_watcher {
        if let Err(e) = handle.await {
            error!(error = %e, "Runtime event watcher ended abnormally");
        }
    }

    if config.streams.stop_on_shutdown {
        let stopped = state.streams.stop_all().await;
        info!(stopped, "Log streams stopped");
    }

    info!("Fleet Gateway stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
