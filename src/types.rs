//! Core types for the registry mirror.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Group used by the registry when none is given.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Identity of a watched service: a (service, group) pair compared by value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub service: String,
    pub group: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            group: group.into(),
        }
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({:?}, {:?})", self.service, self.group)
    }
}

// Display form is for logs only; equality never goes through it.
impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@@{}", self.group, self.service)
    }
}

/// One network instance of a service, as supplied by the registry.
///
/// Field order here is the field order of the serialized JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    #[serde(default = "default_cluster")]
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_cluster() -> String {
    "DEFAULT".to_string()
}

impl Instance {
    /// Healthy, enabled, ephemeral instance with weight 1 in the default cluster.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: None,
            ip: ip.into(),
            port,
            weight: default_weight(),
            healthy: true,
            enabled: true,
            ephemeral: true,
            cluster_name: default_cluster(),
            service_name: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster_name = cluster.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `ip:port`, the identity of an instance within one cluster.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Notification delivered by a registry client to subscribed listeners.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RegistryEvent {
    /// Membership of a watched service changed. Carries the full current
    /// instance list, not a delta.
    InstancesChanged {
        service: String,
        group: String,
        clusters: String,
        instances: Vec<Instance>,
    },

    /// Any other notification kind.
    Other { kind: String },
}

impl RegistryEvent {
    pub fn instances_changed(
        service: impl Into<String>,
        group: impl Into<String>,
        instances: Vec<Instance>,
    ) -> Self {
        RegistryEvent::InstancesChanged {
            service: service.into(),
            group: group.into(),
            clusters: String::new(),
            instances,
        }
    }
}

/// One page of a service listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePage {
    /// Total number of services in the group, across all pages.
    pub count: usize,
    /// Service names on this page.
    pub services: Vec<String>,
}

/// A subscription the registry client already holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribedService {
    pub name: String,
    pub group: String,
}

impl SubscribedService {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.name.clone(), self.group.clone())
    }
}

/// Normalized output unit, one per membership-change notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub namespace: String,
    pub service: String,
    /// JSON array of the instances, in the order the registry supplied them.
    pub instances: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_is_structural() {
        // Would collide as "a@b" + "c" vs "a" + "b@c" under concatenation.
        let left = ServiceKey::new("a@b", "c");
        let right = ServiceKey::new("a", "b@c");
        assert_ne!(left, right);
        assert_eq!(left, ServiceKey::new("a@b", "c"));
    }

    #[test]
    fn test_instance_json_shape() {
        let instance = Instance::new("10.0.0.1", 8080).with_metadata("zone", "a");
        let json = serde_json::to_string(&instance).unwrap();
        assert_eq!(
            json,
            r#"{"ip":"10.0.0.1","port":8080,"weight":1.0,"healthy":true,"enabled":true,"ephemeral":true,"clusterName":"DEFAULT","metadata":{"zone":"a"}}"#
        );
    }

    #[test]
    fn test_instance_defaults_on_deserialize() {
        let instance: Instance = serde_json::from_str(r#"{"ip":"10.0.0.2","port":9090}"#).unwrap();
        assert_eq!(instance, Instance::new("10.0.0.2", 9090));
        assert_eq!(instance.address(), "10.0.0.2:9090");
    }
}
