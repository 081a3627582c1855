//! Docker/Podman runtime backed by the Engine API

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::StreamExt;
use tracing::{debug, info};

use crate::models::PortMapping;

use super::{
    ContainerRef, EventStream, LogFrame, LogSource, LogStream, RawContainer, RawMount,
    RuntimeClient, RuntimeError, RuntimeEvent, RuntimeResult,
};

/// HTTP status the engine answers with when a container is already in the
/// requested state
const NOT_MODIFIED: u16 = 304;

/// Runtime client talking to a Docker-compatible engine
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the engine at `host`, or the platform default socket
    pub fn connect(host: Option<&str>, timeout_seconds: u64) -> Result<Self> {
        let docker = match host {
            Some(addr) if addr.starts_with("tcp://") || addr.starts_with("http://") => {
                Docker::connect_with_http(addr, timeout_seconds, API_DEFAULT_VERSION)
            }
            Some(path) => Docker::connect_with_local(
                path.trim_start_matches("unix://"),
                timeout_seconds,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults()
                .map(|docker| docker.with_timeout(Duration::from_secs(timeout_seconds))),
        }
        .context("Failed to connect to container runtime")?;

        info!(host = host.unwrap_or("local default"), "Container runtime client configured");

        Ok(Self { docker })
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn version(&self) -> RuntimeResult<String> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_default())
    }

    async fn list_all(&self) -> RuntimeResult<Vec<RawContainer>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().map(raw_container).collect())
    }

    async fn get(&self, id: &str) -> RuntimeResult<Option<ContainerRef>> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(Some(ContainerRef {
                id: inspect.id.unwrap_or_else(|| id.to_string()),
            })),
            Err(err) => {
                let err = RuntimeError::from(err);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        let result = self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await;
        already_there_is_ok(result.map_err(RuntimeError::from))
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let result = self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await;
        already_there_is_ok(result.map_err(RuntimeError::from))
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: &str) -> RuntimeResult<LogStream> {
        // The engine only reports an unknown id once the stream is polled
        if self.get(id).await?.is_none() {
            return Err(RuntimeError::NotFound(id.to_string()));
        }

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        debug!(container_id = %id, "Opening log stream");

        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|item| {
                item.map(log_frame)
                    .map_err(|e| RuntimeError::Stream(e.to_string()))
            })
            .boxed();

        Ok(stream)
    }

    async fn create_from_image(&self, image: &str) -> RuntimeResult<ContainerRef> {
        let config = Config::<String> {
            image: Some(image.to_string()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &created.warnings {
            debug!(image = %image, warning = %warning, "Runtime warning on create");
        }

        Ok(ContainerRef { id: created.id })
    }

    async fn events(&self) -> RuntimeResult<EventStream> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self
            .docker
            .events(Some(options))
            .map(|item| {
                item.map(|message| RuntimeEvent {
                    container_id: message.actor.and_then(|actor| actor.id).unwrap_or_default(),
                    action: message.action.unwrap_or_default(),
                })
                .map_err(RuntimeError::from)
            })
            .boxed();

        Ok(stream)
    }
}

fn already_there_is_ok(result: RuntimeResult<()>) -> RuntimeResult<()> {
    match result {
        Err(RuntimeError::Rejected { status, .. }) if status == NOT_MODIFIED => Ok(()),
        other => other,
    }
}

fn log_frame(output: LogOutput) -> LogFrame {
    let (source, message) = match output {
        LogOutput::StdOut { message } => (LogSource::Stdout, message),
        LogOutput::StdErr { message } => (LogSource::Stderr, message),
        LogOutput::Console { message } | LogOutput::StdIn { message } => {
            (LogSource::Console, message)
        }
    };

    LogFrame {
        source,
        message: message.to_vec(),
    }
}

fn raw_container(container: bollard::models::ContainerSummary) -> RawContainer {
    let ports = container
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|port| PortMapping {
            protocol: port.typ.map(|t| t.to_string()).unwrap_or_default(),
            ip: port.ip,
            private_port: Some(port.private_port),
            public_port: port.public_port,
        })
        .collect();

    let mounts = container
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|mount| RawMount {
            mount_type: mount.typ.map(|t| t.to_string()).unwrap_or_default(),
            name: mount.name,
            source: mount.source.unwrap_or_default(),
            destination: mount.destination.unwrap_or_default(),
            mode: mount.mode.unwrap_or_default(),
            rw: mount.rw.unwrap_or(false),
            propagation: mount.propagation.unwrap_or_default(),
        })
        .collect();

    RawContainer {
        id: container.id.unwrap_or_default(),
        names: container.names.unwrap_or_default(),
        image: container.image.unwrap_or_default(),
        command: container.command.unwrap_or_default(),
        state: container.state.unwrap_or_default(),
        status: container.status.unwrap_or_default(),
        ports,
        mounts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_modified_is_success() {
        let result = already_there_is_ok(Err(RuntimeError::Rejected {
            status: 304,
            message: String::new(),
        }));
        assert!(result.is_ok());

        let result = already_there_is_ok(Err(RuntimeError::Rejected {
            status: 500,
            message: "boom".to_string(),
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_log_output_demultiplexing() {
        let frame = log_frame(LogOutput::StdErr {
            message: "oops\n".into(),
        });
        assert_eq!(frame.source, LogSource::Stderr);
        assert_eq!(frame.message, b"oops\n".to_vec());

        let frame = log_frame(LogOutput::StdOut {
            message: "hello\n".into(),
        });
        assert_eq!(frame.source, LogSource::Stdout);
    }

    #[test]
    fn test_raw_container_mapping() {
        let summary = bollard::models::ContainerSummary {
            id: Some("abc123".to_string()),
            names: Some(vec!["/web".to_string()]),
            image: Some("nginx:latest".to_string()),
            state: Some("running".to_string()),
            status: Some("Up 2 minutes".to_string()),
            ..Default::default()
        };

        let raw = raw_container(summary);
        assert_eq!(raw.id, "abc123");
        assert_eq!(raw.names, vec!["/web".to_string()]);
        assert_eq!(raw.state, "running");
        assert!(raw.ports.is_empty());
        assert!(raw.mounts.is_empty());
    }
}
