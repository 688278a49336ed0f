//! In-memory runtime for tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{ContainerDetail, ContainerRuntime, EventStream, PortSpec, RuntimeError};
use crate::types::LifecycleEvent;

/// What one call to `open_events` produces.
pub enum Session {
    /// Yields these items, then ends.
    Events(Vec<Result<LifecycleEvent, RuntimeError>>),
    /// Never yields anything.
    Idle,
}

#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<Vec<ContainerDetail>>,
    pub broken: HashSet<String>,
    pub sessions: Mutex<VecDeque<Session>>,
    pub list_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub fail_listing: bool,
}

impl FakeRuntime {
    pub fn with_containers(containers: Vec<ContainerDetail>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    pub fn push_session(&self, session: Session) {
        self.sessions.lock().unwrap().push_back(session);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

pub fn container(id: &str, image: &str, ports: &[&str], env: &[&str]) -> ContainerDetail {
    ContainerDetail {
        id: id.to_string(),
        name: id.to_string(),
        image: image.to_string(),
        ip_address: "172.17.0.2".to_string(),
        ports: ports
            .iter()
            .map(|port| PortSpec {
                port: port.to_string(),
                bindings: Vec::new(),
            })
            .collect(),
        env: env.iter().map(|e| e.to_string()).collect(),
    }
}

pub fn event(status: &str) -> LifecycleEvent {
    LifecycleEvent {
        container_id: "abc".to_string(),
        status: status.to_string(),
        image: "nginx".to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(RuntimeError::Unavailable("listing disabled".into()));
        }
        let containers = self.containers.lock().unwrap();
        Ok(containers.iter().map(|c| c.id.clone()).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError> {
        if self.broken.contains(id) {
            return Err(RuntimeError::Unavailable(format!("cannot inspect {id}")));
        }
        let containers = self.containers.lock().unwrap();
        containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RuntimeError::Unavailable(format!("no such container {id}")))
    }

    async fn open_events(&self) -> Result<EventStream<'_>, RuntimeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(Session::Events(items)) => Ok(stream::iter(items).boxed()),
            Some(Session::Idle) => Ok(stream::pending().boxed()),
            None => Err(RuntimeError::Unavailable("connection refused".into())),
        }
    }
}
