//! Container registry
//!
//! Keeps subscribers' view of the fleet fresh. A background loop lists every
//! container on a fixed period and on demand, normalizes the records and
//! publishes a complete snapshot. Snapshots are never patched in place.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::broadcast::EventBroadcaster;
use crate::config::RegistryConfig;
use crate::models::{ContainerSummary, MountInfo, RegistrySnapshot};
use crate::runtime::{RawContainer, RuntimeClient};

/// Pause before re-subscribing to runtime events after the stream breaks
const EVENT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Mount type the runtime reports for named volumes
const VOLUME_MOUNT_TYPE: &str = "volume";

/// Produces and publishes registry snapshots
pub struct ContainerRegistry {
    runtime: Arc<dyn RuntimeClient>,
    broadcaster: Arc<EventBroadcaster>,
    config: RegistryConfig,
    refresh_requested: Notify,
}

impl ContainerRegistry {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        broadcaster: Arc<EventBroadcaster>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            runtime,
            broadcaster,
            config,
            refresh_requested: Notify::new(),
        }
    }

    /// List all containers and publish a fresh snapshot.
    ///
    /// Returns `None` when the runtime could not be reached; the poll is then
    /// skipped and subscribers keep the previous snapshot.
    pub async fn refresh(&self) -> Option<Arc<RegistrySnapshot>> {
        let raw = match self.runtime.list_all().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Container listing failed, skipping poll");
                crate::metrics::record_poll(false);
                return None;
            }
        };

        let snapshot = RegistrySnapshot::partition(raw.into_iter().map(normalize).collect());
        trace!(
            running = snapshot.running.len(),
            stopped = snapshot.stopped.len(),
            "Publishing registry snapshot"
        );
        crate::metrics::record_poll(true);

        Some(self.broadcaster.publish_snapshot(snapshot))
    }

    /// Ask the poll loop for an immediate refresh.
    ///
    /// Requests made while a refresh is pending collapse into one.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Poll until the shutdown flag flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = self.config.poll_interval();
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Starting container registry poller"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = self.refresh_requested.notified() => {
                    trace!("On-demand registry refresh");
                    self.refresh().await;
                    ticker.reset();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Registry poller received shutdown signal");
                        break;
                    }
                }
            }
        }

        debug!("Registry poller stopped");
    }

    /// Refresh whenever the runtime reports a container lifecycle event.
    ///
    /// Polling keeps running alongside and reconciles anything missed while
    /// the event stream is down.
    pub async fn watch_runtime_events(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.watch_runtime_events {
            return;
        }

        loop {
            match self.runtime.events().await {
                Ok(mut events) => {
                    debug!("Subscribed to runtime container events");
                    loop {
                        tokio::select! {
                            event = events.next() => match event {
                                Some(Ok(event)) => {
                                    trace!(
                                        container_id = %event.container_id,
                                        action = %event.action,
                                        "Runtime container event"
                                    );
                                    self.request_refresh();
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Runtime event stream failed");
                                    break;
                                }
                                None => break,
                            },
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Could not subscribe to runtime events"),
            }

            tokio::select! {
                _ = sleep(EVENT_RECONNECT_DELAY) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Project a raw runtime record into the subscriber-facing summary
pub fn normalize(raw: RawContainer) -> ContainerSummary {
    let name = raw
        .names
        .iter()
        .map(|n| n.strip_prefix('/').unwrap_or(n.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let status = format!("{} ({})", raw.state, raw.status);

    let volumes: BTreeSet<String> = raw
        .mounts
        .iter()
        .filter(|m| m.mount_type == VOLUME_MOUNT_TYPE)
        .filter_map(|m| m.name.clone())
        .collect();

    let mounts = raw
        .mounts
        .into_iter()
        .map(|m| MountInfo {
            mount_type: m.mount_type,
            source: m.source,
            destination: m.destination,
            mode: m.mode,
            rw: m.rw,
            propagation: m.propagation,
        })
        .collect();

    ContainerSummary {
        id: raw.id,
        name,
        image: raw.image,
        command: raw.command,
        state: raw.state,
        status,
        ports: raw.ports,
        volumes,
        mounts,
    }
}
