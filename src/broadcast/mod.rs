//! Event fan-out to connected subscribers
//!
//! Every subscriber receives every event. Registry snapshots are also kept in a
//! watch slot so a newly connecting subscriber gets the latest one immediately.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::models::{CommandOutcome, GatewayEvent, LogBatch, RegistrySnapshot};

/// Fan-out channel for snapshots, log batches and command outcomes
pub struct EventBroadcaster {
    events: broadcast::Sender<GatewayEvent>,
    latest_snapshot: watch::Sender<Option<Arc<RegistrySnapshot>>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (latest_snapshot, _) = watch::channel(None);

        Self {
            events,
            latest_snapshot,
        }
    }

    /// Replace the current snapshot and push it to every subscriber
    pub fn publish_snapshot(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.latest_snapshot.send_replace(Some(snapshot.clone()));
        self.emit(GatewayEvent::Snapshot(snapshot.clone()));
        snapshot
    }

    pub fn publish_logs(&self, batch: LogBatch) {
        self.emit(GatewayEvent::Logs(Arc::new(batch)));
    }

    pub fn publish_outcome(&self, outcome: CommandOutcome) {
        self.emit(GatewayEvent::Outcome(outcome));
    }

    fn emit(&self, event: GatewayEvent) {
        // No receivers is not an error
        let delivered = self.events.send(event).unwrap_or(0);
        trace!(subscribers = delivered, "Event broadcast");
    }

    /// Attach a new subscriber, seeded with the latest snapshot
    pub fn subscribe(&self) -> Subscription {
        // Subscribe first so a snapshot published in between is not lost
        let events = self.events.subscribe();
        Subscription {
            snapshot: self.current_snapshot(),
            events,
        }
    }

    pub fn current_snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.latest_snapshot.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

/// One subscriber's view of the broadcaster
pub struct Subscription {
    /// Snapshot current at subscribe time, if any poll has completed
    pub snapshot: Option<Arc<RegistrySnapshot>>,
    events: broadcast::Receiver<GatewayEvent>,
}

impl Subscription {
    /// Next event; `None` once the broadcaster is gone.
    ///
    /// A subscriber that falls behind skips the events it missed rather than
    /// being disconnected; the next snapshot supersedes any lost one.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged behind, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged behind, skipping events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
