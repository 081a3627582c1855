//! Log streaming session lifecycle

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::broadcast::EventBroadcaster;
use crate::models::{CommandOutcome, LogBatch, StreamSessionInfo};
use crate::runtime::RuntimeClient;

use super::session::LogSession;

/// Registry entry for one live session
struct SessionEntry {
    session_id: Uuid,
    started_at: DateTime<Utc>,

    /// Task owning the runtime stream; aborting it drops the stream
    task: JoinHandle<()>,
}

type SessionMap = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStart {
    /// A new session was registered
    Started(Uuid),

    /// The container already had a session; it was left untouched
    AlreadyActive(Uuid),
}

impl StreamStart {
    pub fn session_id(&self) -> Uuid {
        match self {
            StreamStart::Started(id) | StreamStart::AlreadyActive(id) => *id,
        }
    }
}

/// Owns every active per-container log streaming session
pub struct LogStreamManager {
    runtime: Arc<dyn RuntimeClient>,
    broadcaster: Arc<EventBroadcaster>,
    flush_threshold: usize,

    /// Active sessions by container ID
    sessions: SessionMap,
}

impl LogStreamManager {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        broadcaster: Arc<EventBroadcaster>,
        flush_threshold: usize,
    ) -> Self {
        Self {
            runtime,
            broadcaster,
            flush_threshold: flush_threshold.max(1),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start following a container's logs.
    ///
    /// At most one session exists per container. A second request while one
    /// is active returns the existing session instead of opening another
    /// runtime stream.
    pub async fn start_stream(&self, container_id: &str) -> StreamStart {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(container_id) {
            debug!(
                container_id = %container_id,
                session_id = %existing.session_id,
                "Log stream already active"
            );
            return StreamStart::AlreadyActive(existing.session_id);
        }

        let session_id = Uuid::new_v4();
        let pump = SessionPump {
            runtime: self.runtime.clone(),
            broadcaster: self.broadcaster.clone(),
            sessions: self.sessions.clone(),
            session: LogSession::new(session_id, container_id.to_string(), self.flush_threshold),
        };

        // The entry is inserted before the write lock is released, so the
        // task cannot try to deregister itself before it is registered
        let task = tokio::spawn(pump.run());
        sessions.insert(
            container_id.to_string(),
            SessionEntry {
                session_id,
                started_at: Utc::now(),
                task,
            },
        );
        crate::metrics::set_active_log_sessions(sessions.len());

        info!(container_id = %container_id, session_id = %session_id, "Log stream started");
        StreamStart::Started(session_id)
    }

    /// Stop following a container's logs.
    ///
    /// The session disappears from the registry before this returns; releasing
    /// the runtime stream happens in the background. No batch for the session
    /// is broadcast after this returns, and lines buffered but not yet flushed
    /// are discarded. Returns `false` when no session existed.
    pub async fn stop_stream(&self, container_id: &str) -> bool {
        let entry = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions.remove(container_id);
            crate::metrics::set_active_log_sessions(sessions.len());
            entry
        };

        match entry {
            Some(entry) => {
                entry.task.abort();
                info!(
                    container_id = %container_id,
                    session_id = %entry.session_id,
                    "Log stream stopped"
                );
                true
            }
            None => {
                debug!(container_id = %container_id, "No log stream to stop");
                false
            }
        }
    }

    /// Release every session (shutdown)
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<(String, SessionEntry)> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };
        crate::metrics::set_active_log_sessions(0);

        for (container_id, entry) in &drained {
            entry.task.abort();
            debug!(container_id = %container_id, "Log stream released");
        }

        if !drained.is_empty() {
            info!(count = drained.len(), "Stopped all log streams");
        }
        drained.len()
    }

    pub async fn is_streaming(&self, container_id: &str) -> bool {
        self.sessions.read().await.contains_key(container_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Describe all active sessions
    pub async fn active_sessions(&self) -> Vec<StreamSessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<StreamSessionInfo> = sessions
            .iter()
            .map(|(container_id, entry)| StreamSessionInfo {
                container_id: container_id.clone(),
                session_id: entry.session_id,
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }
}

/// Task body of one session: read frames, batch them, report the end
struct SessionPump {
    runtime: Arc<dyn RuntimeClient>,
    broadcaster: Arc<EventBroadcaster>,
    sessions: SessionMap,
    session: LogSession,
}

impl SessionPump {
    async fn run(mut self) {
        let container_id = self.session.container_id.clone();

        let mut stream = match self.runtime.logs(&container_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to open log stream");
                if self.deregister().await {
                    self.broadcaster.publish_outcome(CommandOutcome::PipeLogsFailed {
                        id: container_id,
                        reason: e.to_string(),
                    });
                }
                return;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(frame) => {
                    trace!(container_id = %container_id, source = ?frame.source, "Log frame");
                    if let Some(batch) = self.session.push_frame(&frame) {
                        let lines = batch.lines.len();
                        if !self.publish_if_registered(batch).await {
                            debug!(container_id = %container_id, "Session stopped, dropping batch");
                            return;
                        }
                        crate::metrics::record_log_batch(lines);
                    }
                }
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Log stream failed, closing session");
                    break;
                }
            }
        }

        // Release the runtime stream before announcing the end
        drop(stream);
        if !self.deregister().await {
            return;
        }

        let session_id = self.session.session_id;
        let batch = self.session.finish();
        crate::metrics::record_log_batch(batch.lines.len() - 1);
        self.broadcaster.publish_logs(batch);

        info!(container_id = %container_id, session_id = %session_id, "Log stream ended");
    }

    fn is_registered(&self, sessions: &HashMap<String, SessionEntry>) -> bool {
        sessions
            .get(&self.session.container_id)
            .is_some_and(|entry| entry.session_id == self.session.session_id)
    }

    /// Broadcast a batch unless the session was stopped or replaced.
    ///
    /// The check and the send happen under the registry lock, so nothing is
    /// published for a session once `stop_stream` has returned.
    async fn publish_if_registered(&self, batch: LogBatch) -> bool {
        let sessions = self.sessions.read().await;
        if !self.is_registered(&sessions) {
            return false;
        }
        self.broadcaster.publish_logs(batch);
        true
    }

    /// Remove this session's entry; `false` if it was already stopped or replaced
    async fn deregister(&self) -> bool {
        let mut sessions = self.sessions.write().await;
        if !self.is_registered(&sessions) {
            return false;
        }

        sessions.remove(&self.session.container_id);
        crate::metrics::set_active_log_sessions(sessions.len());
        true
    }
}
