//! In-memory runtime used by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};

use super::{
    ContainerRef, LogFrame, LogStream, RawContainer, RuntimeClient, RuntimeError, RuntimeResult,
};

/// Sender side of a scripted log stream; dropping it ends the stream
pub(crate) type LogFeed = mpsc::UnboundedSender<RuntimeResult<LogFrame>>;

/// Build a raw record the way the engine lists it
pub(crate) fn raw(id: &str, name: &str, state: &str) -> RawContainer {
    RawContainer {
        id: id.to_string(),
        names: vec![format!("/{}", name)],
        image: "alpine:latest".to_string(),
        command: "sh".to_string(),
        state: state.to_string(),
        status: if state == "running" {
            "Up 5 seconds".to_string()
        } else {
            "Exited (0) 5 seconds ago".to_string()
        },
        ..Default::default()
    }
}

/// Runtime holding containers in memory
#[derive(Default)]
pub(crate) struct FakeRuntime {
    containers: Mutex<Vec<RawContainer>>,
    feeds: Mutex<HashMap<String, mpsc::UnboundedReceiver<RuntimeResult<LogFrame>>>>,
    start_failure: Mutex<Option<String>>,
    list_unavailable: AtomicBool,
    created: AtomicUsize,
    logs_opened: AtomicUsize,
}

impl FakeRuntime {
    pub(crate) fn with_containers(containers: Vec<RawContainer>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    /// Script the next log stream opened for `id`
    pub(crate) fn feed_logs(&self, id: &str) -> LogFeed {
        let (tx, rx) = mpsc::unbounded();
        self.feeds.lock().unwrap().insert(id.to_string(), rx);
        tx
    }

    /// Make every subsequent `start` fail with `reason`
    pub(crate) fn fail_starts(&self, reason: &str) {
        *self.start_failure.lock().unwrap() = Some(reason.to_string());
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.list_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn logs_opened(&self) -> usize {
        self.logs_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn state_of(&self, id: &str) -> Option<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state.clone())
    }

    fn set_state(&self, id: &str, state: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.state = state.to_string();
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        self.containers.lock().unwrap().iter().any(|c| c.id == id)
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn version(&self) -> RuntimeResult<String> {
        Ok("fake-1.0".to_string())
    }

    async fn list_all(&self) -> RuntimeResult<Vec<RawContainer>> {
        if self.list_unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("connection refused".to_string()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn get(&self, id: &str) -> RuntimeResult<Option<ContainerRef>> {
        Ok(self.exists(id).then(|| ContainerRef { id: id.to_string() }))
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        if let Some(reason) = self.start_failure.lock().unwrap().clone() {
            return Err(RuntimeError::Rejected {
                status: 500,
                message: reason,
            });
        }
        self.set_state(id, "running")
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        self.set_state(id, "exited")
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id);
        if containers.len() == before {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn logs(&self, id: &str) -> RuntimeResult<LogStream> {
        if !self.exists(id) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        self.logs_opened.fetch_add(1, Ordering::SeqCst);

        // Unscripted containers stream nothing and never end
        match self.feeds.lock().unwrap().remove(id) {
            Some(rx) => Ok(rx.boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn create_from_image(&self, image: &str) -> RuntimeResult<ContainerRef> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("created-{}", n);

        let mut container = raw(&id, &format!("{}-{}", image.replace([':', '/'], "-"), n), "created");
        container.image = image.to_string();
        self.containers.lock().unwrap().push(container);

        Ok(ContainerRef { id })
    }
}
