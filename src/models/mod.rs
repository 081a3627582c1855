//! Data models for Fleet Gateway
//!
//! This module defines the container projections pushed to subscribers, the
//! events fanned out by the broadcaster, and the WebSocket wire envelopes.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Container Models
// ============================================================================

/// State value the runtime reports for a running container
pub const RUNNING_STATE: &str = "running";

/// A single published port of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Protocol (`tcp`, `udp`, `sctp`)
    #[serde(rename = "type")]
    pub protocol: String,

    /// Host address the port is bound to
    #[serde(default)]
    pub ip: Option<String>,

    /// Port inside the container
    #[serde(default)]
    pub private_port: Option<u16>,

    /// Port on the host
    #[serde(default)]
    pub public_port: Option<u16>,
}

/// A filesystem mount of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    /// Mount type (`bind`, `volume`, `tmpfs`, ...)
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
    pub propagation: String,
}

/// Normalized view of one container at one poll instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,

    /// Display name: runtime aliases without their leading `/`, comma joined
    pub name: String,

    pub image: String,
    pub command: String,

    /// Coarse state, verbatim from the runtime
    pub state: String,

    /// `"<state> (<detailed status>)"`
    pub status: String,

    pub ports: Vec<PortMapping>,

    /// Names of the named volumes mounted into the container
    pub volumes: BTreeSet<String>,

    pub mounts: Vec<MountInfo>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == RUNNING_STATE
    }
}

/// Wholesale view of every container, split by running state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub running: Vec<ContainerSummary>,
    pub stopped: Vec<ContainerSummary>,
    pub taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Partition containers by state, keeping the runtime's listing order
    pub fn partition(containers: Vec<ContainerSummary>) -> Self {
        let (running, stopped): (Vec<_>, Vec<_>) =
            containers.into_iter().partition(ContainerSummary::is_running);

        Self {
            running,
            stopped,
            taken_at: Utc::now(),
        }
    }

    /// Total number of containers in the snapshot
    pub fn len(&self) -> usize {
        self.running.len() + self.stopped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a container in either partition
    pub fn find(&self, id: &str) -> Option<&ContainerSummary> {
        self.running
            .iter()
            .chain(self.stopped.iter())
            .find(|c| c.id == id)
    }
}

// ============================================================================
// Log Streaming Models
// ============================================================================

/// Batch of log lines flushed from one streaming session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub container_id: String,

    /// Lines in arrival order
    #[serde(rename = "results")]
    pub lines: Vec<String>,

    /// Set on the final batch of a session; its last line is the sentinel
    #[serde(default)]
    pub terminated: bool,
}

/// Summary of an active log streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSessionInfo {
    pub container_id: String,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Command Models
// ============================================================================

/// Result of a control command, serialized directly as a wire event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CommandOutcome {
    #[serde(rename = "container.started")]
    Started { id: String },

    #[serde(rename = "container.stopped")]
    Stopped { id: String },

    #[serde(rename = "container.start_failed")]
    StartFailed { id: String, reason: String },

    #[serde(rename = "container.stop_failed")]
    StopFailed { id: String, reason: String },

    #[serde(rename = "container.removed_success")]
    Removed { id: String },

    #[serde(rename = "container.removed_fail")]
    RemoveFailed { id: String, reason: String },

    #[serde(rename = "image.error")]
    RunFailed { name: String, reason: String },

    #[serde(rename = "container.pipe_logs_failed")]
    PipeLogsFailed { id: String, reason: String },
}

impl CommandOutcome {
    /// Wire event name of this outcome
    pub fn event_name(&self) -> &'static str {
        match self {
            CommandOutcome::Started { .. } => "container.started",
            CommandOutcome::Stopped { .. } => "container.stopped",
            CommandOutcome::StartFailed { .. } => "container.start_failed",
            CommandOutcome::StopFailed { .. } => "container.stop_failed",
            CommandOutcome::Removed { .. } => "container.removed_success",
            CommandOutcome::RemoveFailed { .. } => "container.removed_fail",
            CommandOutcome::RunFailed { .. } => "image.error",
            CommandOutcome::PipeLogsFailed { .. } => "container.pipe_logs_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CommandOutcome::StartFailed { .. }
                | CommandOutcome::StopFailed { .. }
                | CommandOutcome::RemoveFailed { .. }
                | CommandOutcome::RunFailed { .. }
                | CommandOutcome::PipeLogsFailed { .. }
        )
    }
}

// ============================================================================
// Broadcast and Wire Models
// ============================================================================

/// Event fanned out to every connected subscriber
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Snapshot(Arc<RegistrySnapshot>),
    Logs(Arc<LogBatch>),
    Outcome(CommandOutcome),
}

impl GatewayEvent {
    /// Encode as a `{"event": .., "data": ..}` text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            GatewayEvent::Snapshot(snapshot) => {
                serde_json::to_string(&ServerMessage::ContainersList(snapshot))
            }
            GatewayEvent::Logs(batch) => serde_json::to_string(&ServerMessage::PipedLogs(batch)),
            GatewayEvent::Outcome(outcome) => serde_json::to_string(outcome),
        }
    }
}

/// Outbound frames that are not command outcomes
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage<'a> {
    #[serde(rename = "containers.list")]
    ContainersList(&'a RegistrySnapshot),

    #[serde(rename = "container.return_piped_logs")]
    PipedLogs(&'a LogBatch),

    /// Connection-local reply to a frame that could not be handled
    #[serde(rename = "error")]
    Error { message: String },
}

/// Inbound subscriber commands
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "containers.list")]
    ListContainers,

    #[serde(rename = "container.start")]
    Start { id: String },

    #[serde(rename = "container.stop")]
    Stop { id: String },

    #[serde(rename = "container.remove")]
    Remove { id: String },

    #[serde(rename = "image.run")]
    RunImage { name: String },

    #[serde(rename = "container.pipe_logs")]
    PipeLogs { id: String },

    #[serde(rename = "container.stop_pipe_logs")]
    StopPipeLogs { id: String },
}

// ============================================================================
// Health Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub runtime_version: Option<String>,
    pub active_log_sessions: usize,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Error body returned by the REST endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(id: &str, state: &str) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            name: id.to_string(),
            image: "alpine:latest".to_string(),
            command: "sh".to_string(),
            state: state.to_string(),
            status: format!("{} (Up 1 second)", state),
            ports: vec![],
            volumes: BTreeSet::new(),
            mounts: vec![],
        }
    }

    #[test]
    fn test_partition_is_disjoint_and_ordered() {
        let snapshot = RegistrySnapshot::partition(vec![
            summary("a", "running"),
            summary("b", "exited"),
            summary("c", "running"),
            summary("d", "created"),
        ]);

        let running: Vec<_> = snapshot.running.iter().map(|c| c.id.as_str()).collect();
        let stopped: Vec<_> = snapshot.stopped.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(running, vec!["a", "c"]);
        assert_eq!(stopped, vec!["b", "d"]);
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.find("d").is_some());
    }

    #[test]
    fn test_client_command_decoding() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"event":"container.start","data":{"id":"abc"}}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Start { id: "abc".to_string() });

        let cmd: ClientCommand = serde_json::from_str(r#"{"event":"containers.list"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::ListContainers);

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"event":"image.run","data":{"name":"alpine:latest"}}"#)
                .unwrap();
        assert_eq!(cmd, ClientCommand::RunImage { name: "alpine:latest".to_string() });

        assert!(serde_json::from_str::<ClientCommand>(r#"{"event":"container.explode"}"#).is_err());
    }

    #[test]
    fn test_outcome_wire_format() {
        let outcome = CommandOutcome::RemoveFailed {
            id: "abc".to_string(),
            reason: "no container with that id".to_string(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&GatewayEvent::Outcome(outcome.clone()).to_json().unwrap())
                .unwrap();

        assert_eq!(value["event"], outcome.event_name());
        assert_eq!(value["data"]["reason"], "no container with that id");
        assert!(outcome.is_failure());
        assert!(!CommandOutcome::Removed { id: "abc".to_string() }.is_failure());
        assert!(CommandOutcome::PipeLogsFailed {
            id: "abc".to_string(),
            reason: "gone".to_string(),
        }
        .is_failure());
    }

    #[test]
    fn test_log_batch_wire_format() {
        let batch = LogBatch {
            container_id: "abc".to_string(),
            lines: vec!["hello".to_string()],
            terminated: false,
        };
        let value: serde_json::Value =
            serde_json::from_str(&GatewayEvent::Logs(Arc::new(batch)).to_json().unwrap())
                .unwrap();

        assert_eq!(value["event"], "container.return_piped_logs");
        assert_eq!(value["data"]["containerId"], "abc");
        assert_eq!(value["data"]["results"][0], "hello");
    }
}
