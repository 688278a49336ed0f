use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::types::LifecycleEvent;

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

pub type EventStream<'a> = BoxStream<'a, Result<LifecycleEvent, RuntimeError>>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

/// Raw inspection data for one container, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub ip_address: String,
    pub ports: Vec<PortSpec>,
    /// `KEY=VALUE` entries exactly as the runtime reports them.
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    /// Runtime port key such as `8080/tcp`.
    pub port: String,
    pub bindings: Vec<HostBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of the currently running containers.
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError>;

    /// Connect to the runtime's event feed.  An error here means the
    /// runtime could not be reached at all.
    async fn open_events(&self) -> Result<EventStream<'_>, RuntimeError>;
}
