//! Container runtime client for Fleet Gateway
//!
//! The gateway never talks to Docker/Podman directly. Every component receives
//! an `Arc<dyn RuntimeClient>` so the runtime can be swapped for a fake in tests.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::models::PortMapping;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};

/// Live, demultiplexable log output of one container
pub type LogStream = BoxStream<'static, RuntimeResult<LogFrame>>;

/// Container lifecycle notifications from the runtime
pub type EventStream = BoxStream<'static, RuntimeResult<RuntimeEvent>>;

/// Raw container record as listed by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawContainer {
    pub id: String,

    /// Aliases, each carrying the runtime's leading `/`
    pub names: Vec<String>,

    pub image: String,
    pub command: String,
    pub state: String,

    /// Detailed status, e.g. `Up 3 minutes`
    pub status: String,

    pub ports: Vec<PortMapping>,
    pub mounts: Vec<RawMount>,
}

/// Raw mount record as listed by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMount {
    pub mount_type: String,

    /// Volume name (named volumes only)
    pub name: Option<String>,

    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
    pub propagation: String,
}

/// Resolved reference to an existing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
}

/// Which output channel a log frame was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
    Console,
}

/// One demultiplexed frame of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub source: LogSource,
    pub message: Vec<u8>,
}

impl LogFrame {
    pub fn stdout(message: impl Into<Vec<u8>>) -> Self {
        Self {
            source: LogSource::Stdout,
            message: message.into(),
        }
    }

    pub fn stderr(message: impl Into<Vec<u8>>) -> Self {
        Self {
            source: LogSource::Stderr,
            message: message.into(),
        }
    }
}

/// Container lifecycle notification (`start`, `die`, `destroy`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub action: String,
}

/// Operations the gateway needs from a container runtime
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Runtime version string, used as a health probe
    async fn version(&self) -> RuntimeResult<String>;

    /// List every container, including stopped ones
    async fn list_all(&self) -> RuntimeResult<Vec<RawContainer>>;

    /// Resolve a container id; `Ok(None)` when the runtime does not know it
    async fn get(&self, id: &str) -> RuntimeResult<Option<ContainerRef>>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    async fn remove(&self, id: &str) -> RuntimeResult<()>;

    /// Follow combined stdout and stderr. Dropping the stream releases it.
    async fn logs(&self, id: &str) -> RuntimeResult<LogStream>;

    /// Create (but do not start) a container from an image
    async fn create_from_image(&self, image: &str) -> RuntimeResult<ContainerRef>;

    /// Container lifecycle notifications; runtimes without them yield nothing
    async fn events(&self) -> RuntimeResult<EventStream> {
        Ok(stream::empty().boxed())
    }
}
