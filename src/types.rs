//! Data structures used throughout the generator.
//!
//! A [`ContainerRecord`] is built fresh from inspection data on every
//! regeneration cycle and never mutated afterwards, so the same snapshot
//! can be handed to every template without copying.  Records and
//! addresses are exposed to templates as minijinja objects so the path
//! resolver can tell named-field records apart from dynamic maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::{Enumerator, Object, Value};

/// One network endpoint of a container.
///
/// `host_ip`/`host_port` are empty when the port is only exposed and not
/// bound on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub ip: String,
    pub port: String,
    pub proto: String,
    pub host_ip: String,
    pub host_port: String,
}

impl Address {
    pub fn is_published(&self) -> bool {
        !self.host_port.is_empty()
    }
}

impl Object for Address {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let field = match key.as_str()? {
            "ip" => &self.ip,
            "port" => &self.port,
            "proto" => &self.proto,
            "host_ip" => &self.host_ip,
            "host_port" => &self.host_port,
            _ => return None,
        };
        Some(Value::from(field.as_str()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["ip", "port", "proto", "host_ip", "host_port"])
    }
}

/// A normalized running container, as seen by templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub addresses: Vec<Address>,
    /// Sorted so repeated renders of the same snapshot are byte-identical.
    pub env: BTreeMap<String, String>,
}

impl ContainerRecord {
    pub fn is_exposed(&self) -> bool {
        !self.addresses.is_empty()
    }

    pub fn is_published(&self) -> bool {
        self.addresses.iter().any(Address::is_published)
    }
}

impl Object for ContainerRecord {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "id" => Some(Value::from(self.id.as_str())),
            "name" => Some(Value::from(self.name.as_str())),
            "image" => Some(Value::from(self.image.as_str())),
            "addresses" => Some(Value::from(
                self.addresses
                    .iter()
                    .cloned()
                    .map(Value::from_object)
                    .collect::<Vec<_>>(),
            )),
            "env" => Some(Value::from_serialize(&self.env)),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["id", "name", "image", "addresses", "env"])
    }
}

/// A container lifecycle event decoded from the runtime's event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub container_id: String,
    pub status: String,
    pub image: String,
}

impl LifecycleEvent {
    /// Only these statuses change which containers are running.
    pub const TRIGGERS: [&'static str; 3] = ["start", "stop", "die"];

    pub fn triggers_regeneration(&self) -> bool {
        Self::TRIGGERS.contains(&self.status.as_str())
    }
}
