use super::{ContainerDetail, ContainerRuntime, EventStream, HostBinding, PortSpec, RuntimeError};
use crate::types::LifecycleEvent;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerInspectResponse, EventMessage};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, info};
use std::collections::HashMap;

/// Request timeout in seconds for explicitly configured endpoints.
const TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `endpoint` (`unix://...` or `tcp://...`), or to the local
    /// daemon using bollard's defaults when none is given.
    pub fn connect(endpoint: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match endpoint {
            None => Docker::connect_with_local_defaults()?,
            Some(addr) if addr.starts_with("unix://") => {
                Docker::connect_with_unix(addr, TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            Some(addr) => Docker::connect_with_http(addr, TIMEOUT_SECS, API_DEFAULT_VERSION)?,
        };
        info!("Using Docker endpoint {}", endpoint.unwrap_or("(local default)"));
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError> {
        let detail = self.docker.inspect_container(id, None).await?;
        Ok(container_detail(detail))
    }

    async fn open_events(&self) -> Result<EventStream<'_>, RuntimeError> {
        // The event request itself is lazy, so probe the daemon first to
        // surface an unreachable socket as a connect failure.
        let pong = self.docker.ping().await?;
        if pong.trim() != "OK" {
            return Err(RuntimeError::Unavailable(format!(
                "unexpected ping response `{}`",
                pong.trim()
            )));
        }

        let opts = EventsOptions::<String> {
            filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
            ..Default::default()
        };
        let stream = self
            .docker
            .events(Some(opts))
            .map(|msg| msg.map(lifecycle_event).map_err(RuntimeError::from));
        Ok(stream.boxed())
    }
}

fn lifecycle_event(msg: EventMessage) -> LifecycleEvent {
    let actor = msg.actor.unwrap_or_default();
    let mut attributes = actor.attributes.unwrap_or_default();
    let event = LifecycleEvent {
        container_id: actor.id.unwrap_or_default(),
        status: msg.action.unwrap_or_default(),
        image: attributes.remove("image").unwrap_or_default(),
    };
    debug!("Container event: {} for {}", event.status, event.container_id);
    event
}

fn container_detail(detail: ContainerInspectResponse) -> ContainerDetail {
    let config = detail.config.unwrap_or_default();
    let network = detail.network_settings.unwrap_or_default();

    // The top-level address is empty for containers on user-defined
    // networks; fall back to the first attached network by name.
    let mut ip_address = network.ip_address.unwrap_or_default();
    if ip_address.is_empty() {
        let mut networks: Vec<_> = network.networks.unwrap_or_default().into_iter().collect();
        networks.sort_by(|a, b| a.0.cmp(&b.0));
        ip_address = networks
            .into_iter()
            .filter_map(|(_, endpoint)| endpoint.ip_address)
            .find(|ip| !ip.is_empty())
            .unwrap_or_default();
    }

    let ports = network
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| PortSpec {
            port,
            bindings: bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| HostBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port: b.host_port.unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    ContainerDetail {
        id: detail.id.unwrap_or_default(),
        name: detail
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: config.image.unwrap_or_default(),
        ip_address,
        ports,
        env: config.env.unwrap_or_default(),
    }
}
