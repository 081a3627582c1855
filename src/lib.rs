//! Fleet Gateway library
//!
//! This library lets remote subscribers observe and control the containers of
//! a single host in real time: registry snapshots, live log streaming and
//! lifecycle commands, all over one WebSocket.

use std::sync::Arc;

use tokio::sync::watch;

pub mod api;
pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod streams;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub runtime: Arc<dyn runtime::RuntimeClient>,
    pub broadcaster: Arc<broadcast::EventBroadcaster>,
    pub registry: Arc<registry::ContainerRegistry>,
    pub streams: Arc<streams::LogStreamManager>,
    pub dispatcher: Arc<dispatcher::CommandDispatcher>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Wire every component to one runtime client
    pub fn new(config: config::AppConfig, runtime: Arc<dyn runtime::RuntimeClient>) -> Self {
        let broadcaster = Arc::new(broadcast::EventBroadcaster::new(
            config.broadcast.channel_capacity,
        ));

        let registry = Arc::new(registry::ContainerRegistry::new(
            runtime.clone(),
            broadcaster.clone(),
            config.registry.clone(),
        ));

        let streams = Arc::new(streams::LogStreamManager::new(
            runtime.clone(),
            broadcaster.clone(),
            config.streams.flush_threshold,
        ));

        let dispatcher = Arc::new(dispatcher::CommandDispatcher::new(
            runtime.clone(),
            broadcaster.clone(),
            registry.clone(),
        ));

        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            runtime,
            broadcaster,
            registry,
            streams,
            dispatcher,
            shutdown,
        }
    }

    /// Receiver that flips to `true` once shutdown begins
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tell background tasks and open subscriber sockets to wind down
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
