//! Command dispatcher
//!
//! Turns subscriber control requests into runtime calls and broadcasts what
//! happened. Runtime failures never escape: each one becomes an outcome event.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broadcast::EventBroadcaster;
use crate::models::CommandOutcome;
use crate::registry::ContainerRegistry;
use crate::runtime::RuntimeClient;

/// Reason attached to removal of an unknown container
pub const NO_SUCH_CONTAINER: &str = "no container with that id";

/// Executes one-shot container commands
pub struct CommandDispatcher {
    runtime: Arc<dyn RuntimeClient>,
    broadcaster: Arc<EventBroadcaster>,
    registry: Arc<ContainerRegistry>,
}

impl CommandDispatcher {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        broadcaster: Arc<EventBroadcaster>,
        registry: Arc<ContainerRegistry>,
    ) -> Self {
        Self {
            runtime,
            broadcaster,
            registry,
        }
    }

    /// Start a container. Unknown ids are ignored without an outcome.
    pub async fn start(&self, id: &str) -> Option<CommandOutcome> {
        let container = match self.runtime.get(id).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                debug!(container_id = %id, "Start skipped, no such container");
                return None;
            }
            Err(e) => {
                return self.emit(
                    "start",
                    CommandOutcome::StartFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        };

        let outcome = match self.runtime.start(&container.id).await {
            Ok(()) => {
                info!(container_id = %id, "Container started");
                CommandOutcome::Started { id: id.to_string() }
            }
            Err(e) => {
                warn!(container_id = %id, error = %e, "Container start failed");
                CommandOutcome::StartFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        self.registry.request_refresh();
        self.emit("start", outcome)
    }

    /// Stop a container. Unknown ids are ignored without an outcome.
    pub async fn stop(&self, id: &str) -> Option<CommandOutcome> {
        let container = match self.runtime.get(id).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                debug!(container_id = %id, "Stop skipped, no such container");
                return None;
            }
            Err(e) => {
                return self.emit(
                    "stop",
                    CommandOutcome::StopFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        };

        let outcome = match self.runtime.stop(&container.id).await {
            Ok(()) => {
                info!(container_id = %id, "Container stopped");
                CommandOutcome::Stopped { id: id.to_string() }
            }
            Err(e) => {
                warn!(container_id = %id, error = %e, "Container stop failed");
                CommandOutcome::StopFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        self.registry.request_refresh();
        self.emit("stop", outcome)
    }

    /// Remove a container. Unlike start/stop, an unknown id is a failure.
    pub async fn remove(&self, id: &str) -> Option<CommandOutcome> {
        let outcome = match self.runtime.get(id).await {
            Ok(Some(container)) => match self.runtime.remove(&container.id).await {
                Ok(()) => {
                    info!(container_id = %id, "Container removed");
                    self.registry.request_refresh();
                    CommandOutcome::Removed { id: id.to_string() }
                }
                Err(e) => {
                    warn!(container_id = %id, error = %e, "Container removal failed");
                    CommandOutcome::RemoveFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            },
            Ok(None) => CommandOutcome::RemoveFailed {
                id: id.to_string(),
                reason: NO_SUCH_CONTAINER.to_string(),
            },
            Err(e) => CommandOutcome::RemoveFailed {
                id: id.to_string(),
                reason: e.to_string(),
            },
        };

        self.emit("remove", outcome)
    }

    /// Create a container from `image` and start it.
    ///
    /// A failure in either step yields a single `RunFailed`.
    pub async fn run_image(&self, image: &str) -> Option<CommandOutcome> {
        let container = match self.runtime.create_from_image(image).await {
            Ok(container) => container,
            Err(e) => {
                warn!(image = %image, error = %e, "Container creation failed");
                return self.emit(
                    "run_image",
                    CommandOutcome::RunFailed {
                        name: image.to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        };

        // The container exists from here on, started or not
        self.registry.request_refresh();

        let outcome = match self.runtime.start(&container.id).await {
            Ok(()) => {
                info!(image = %image, container_id = %container.id, "Container created and started");
                CommandOutcome::Started { id: container.id }
            }
            Err(e) => {
                warn!(
                    image = %image,
                    container_id = %container.id,
                    error = %e,
                    "Created container failed to start"
                );
                CommandOutcome::RunFailed {
                    name: image.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        self.emit("run_image", outcome)
    }

    fn emit(&self, command: &'static str, outcome: CommandOutcome) -> Option<CommandOutcome> {
        crate::metrics::record_command(command, &outcome);
        self.broadcaster.publish_outcome(outcome.clone());
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Subscription;
    use crate::config::RegistryConfig;
    use crate::models::GatewayEvent;
    use crate::runtime::testing::{raw, FakeRuntime};
    use crate::runtime::{ContainerRef, MockRuntimeClient, RuntimeError};
    use pretty_assertions::assert_eq;

    fn dispatcher(runtime: Arc<dyn RuntimeClient>) -> (CommandDispatcher, Arc<ContainerRegistry>, Subscription) {
        let broadcaster = Arc::new(EventBroadcaster::new(64));
        let registry = Arc::new(ContainerRegistry::new(
            runtime.clone(),
            broadcaster.clone(),
            RegistryConfig::default(),
        ));
        let sub = broadcaster.subscribe();
        let dispatcher = CommandDispatcher::new(runtime, broadcaster, registry.clone());
        (dispatcher, registry, sub)
    }

    fn outcomes(sub: &mut Subscription) -> Vec<CommandOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let GatewayEvent::Outcome(outcome) = event {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    #[tokio::test]
    async fn test_remove_unknown_container_fails() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_get().returning(|_| Ok(None));
        runtime.expect_remove().never();
        let (dispatcher, _, mut sub) = dispatcher(Arc::new(runtime));

        let outcome = dispatcher.remove("ghost").await;

        let expected = CommandOutcome::RemoveFailed {
            id: "ghost".to_string(),
            reason: NO_SUCH_CONTAINER.to_string(),
        };
        assert_eq!(outcome, Some(expected.clone()));
        assert_eq!(outcomes(&mut sub), vec![expected]);
    }

    #[tokio::test]
    async fn test_remove_rejected_by_runtime() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_get()
            .returning(|id| Ok(Some(ContainerRef { id: id.to_string() })));
        runtime.expect_remove().times(1).returning(|_| {
            Err(RuntimeError::Rejected {
                status: 409,
                message: "container is running".to_string(),
            })
        });
        let (dispatcher, _, mut sub) = dispatcher(Arc::new(runtime));

        dispatcher.remove("busy").await;

        let emitted = outcomes(&mut sub);
        assert_eq!(
            emitted,
            vec![CommandOutcome::RemoveFailed {
                id: "busy".to_string(),
                reason: "container is running".to_string(),
            }]
        );
        assert!(!emitted.iter().any(|o| matches!(o, CommandOutcome::Removed { .. })));
    }

    #[tokio::test]
    async fn test_start_and_stop_unknown_container_are_silent() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_get().times(2).returning(|_| Ok(None));
        runtime.expect_start().never();
        runtime.expect_stop().never();
        let (dispatcher, _, mut sub) = dispatcher(Arc::new(runtime));

        assert_eq!(dispatcher.start("ghost").await, None);
        assert_eq!(dispatcher.stop("ghost").await, None);
        assert!(outcomes(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_carries_runtime_reason() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_get()
            .returning(|id| Ok(Some(ContainerRef { id: id.to_string() })));
        runtime.expect_start().returning(|_| {
            Err(RuntimeError::Unavailable("connection refused".to_string()))
        });
        let (dispatcher, _, _sub) = dispatcher(Arc::new(runtime));

        match dispatcher.start("web").await {
            Some(CommandOutcome::StartFailed { id, reason }) => {
                assert_eq!(id, "web");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_image_start_failure_yields_single_run_failed() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.fail_starts("port is already allocated");
        let (dispatcher, _, mut sub) = dispatcher(runtime.clone());

        dispatcher.run_image("alpine:latest").await;

        let emitted = outcomes(&mut sub);
        assert_eq!(
            emitted,
            vec![CommandOutcome::RunFailed {
                name: "alpine:latest".to_string(),
                reason: "port is already allocated".to_string(),
            }]
        );
        assert!(!emitted.iter().any(|o| matches!(o, CommandOutcome::Started { .. })));
    }

    #[tokio::test]
    async fn test_run_image_creation_failure() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_create_from_image().returning(|image| {
            Err(RuntimeError::Rejected {
                status: 404,
                message: format!("No such image: {}", image),
            })
        });
        runtime.expect_start().never();
        let (dispatcher, _, _sub) = dispatcher(Arc::new(runtime));

        let outcome = dispatcher.run_image("nope:latest").await;
        assert_eq!(
            outcome,
            Some(CommandOutcome::RunFailed {
                name: "nope:latest".to_string(),
                reason: "No such image: nope:latest".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_run_image_success_starts_new_container() {
        let runtime = Arc::new(FakeRuntime::default());
        let (dispatcher, registry, _sub) = dispatcher(runtime.clone());

        let outcome = dispatcher.run_image("alpine:latest").await;
        let id = match outcome {
            Some(CommandOutcome::Started { id }) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let snapshot = registry.refresh().await.unwrap();
        let container = snapshot.find(&id).expect("new container is listed");
        assert_eq!(container.image, "alpine:latest");
        assert!(container.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_visible_on_next_poll() {
        let runtime = Arc::new(FakeRuntime::with_containers(vec![
            raw("A", "alpha", "running"),
            raw("B", "bravo", "exited"),
        ]));
        let (dispatcher, registry, _sub) = dispatcher(runtime.clone());

        let before = registry.refresh().await.unwrap();
        assert_eq!(before.running.len(), 1);
        assert_eq!(before.running[0].id, "A");

        let outcome = dispatcher.stop("A").await;
        assert_eq!(outcome, Some(CommandOutcome::Stopped { id: "A".to_string() }));
        assert_eq!(runtime.state_of("A").as_deref(), Some("exited"));

        let after = registry.refresh().await.unwrap();
        assert!(after.running.is_empty());
        let states: Vec<(&str, &str)> = after
            .stopped
            .iter()
            .map(|c| (c.id.as_str(), c.state.as_str()))
            .collect();
        assert_eq!(states, vec![("A", "exited"), ("B", "exited")]);
    }
}
