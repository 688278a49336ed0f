//! Normalization of runtime inspection data into [`ContainerRecord`]s.

use std::collections::BTreeMap;

use log::{debug, error};

use crate::runtime::{ContainerDetail, ContainerRuntime, RuntimeError};
use crate::types::{Address, ContainerRecord};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("error listing containers: {0}")]
    List(#[source] RuntimeError),
    #[error("container {id}: malformed environment entry `{entry}`")]
    MalformedEnv { id: String, entry: String },
}

/// Inspect every running container.
///
/// A container that fails inspection is logged and left out; a malformed
/// environment entry aborts the whole snapshot.
pub async fn build_snapshot<R>(runtime: &R) -> Result<Vec<ContainerRecord>, SnapshotError>
where
    R: ContainerRuntime + ?Sized,
{
    let ids = runtime.list_running().await.map_err(SnapshotError::List)?;

    let mut containers = Vec::with_capacity(ids.len());
    for id in ids {
        let detail = match runtime.inspect(&id).await {
            Ok(detail) => detail,
            Err(e) => {
                error!("error inspecting container: {}: {}", id, e);
                continue;
            }
        };
        containers.push(normalize(detail)?);
    }

    debug!("Snapshot holds {} containers", containers.len());
    Ok(containers)
}

pub fn normalize(detail: ContainerDetail) -> Result<ContainerRecord, SnapshotError> {
    let mut env = BTreeMap::new();
    for entry in &detail.env {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| SnapshotError::MalformedEnv {
                id: detail.id.clone(),
                entry: entry.clone(),
            })?;
        env.insert(key.to_string(), value.to_string());
    }

    let mut addresses: Vec<Address> = detail
        .ports
        .iter()
        .map(|spec| {
            let (port, proto) = spec.port.split_once('/').unwrap_or((spec.port.as_str(), "tcp"));
            let binding = spec.bindings.iter().find(|b| !b.host_port.is_empty());
            Address {
                ip: detail.ip_address.clone(),
                port: port.to_string(),
                proto: proto.to_string(),
                host_ip: binding.map(|b| b.host_ip.clone()).unwrap_or_default(),
                host_port: binding.map(|b| b.host_port.clone()).unwrap_or_default(),
            }
        })
        .collect();
    // The runtime reports ports as an unordered map.
    addresses.sort_by(|a, b| (&a.port, &a.proto).cmp(&(&b.port, &b.proto)));

    Ok(ContainerRecord {
        id: detail.id,
        name: detail.name,
        image: detail.image,
        addresses,
        env,
    })
}
