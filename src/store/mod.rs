//! State stores
//!
//! The interface store caches what is actually attached to the switch; the
//! descriptor store holds what the provisioning controller wants attached.

use crate::switch::{
    PortData, EXTERNAL_ID_ATTACHED_MAC, EXTERNAL_ID_CONTAINER_ID, EXTERNAL_ID_IFACE_ID,
    EXTERNAL_ID_IP_ADDRESS, EXTERNAL_ID_POD_NAME, EXTERNAL_ID_POD_NAMESPACE,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use tracing::warn;

pub mod descriptor;

pub use descriptor::{DescriptorLister, FileDescriptorStore, InterfaceDescriptor, PodLister, PodRef};

/// `namespace/name`, or just `name` for cluster-scoped objects
pub fn namespaced_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// Switch side of an attached interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvsPortConfig {
    pub port_uuid: String,
    /// None until the switch assigns one
    pub ofport: Option<u32>,
}

/// One container interface attached to the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Host-side interface name, also the switch port name
    pub interface_name: String,
    pub container_id: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub vif_id: String,
    pub mac: String,
    pub ips: Vec<IpAddr>,
    pub ovs_port: Option<OvsPortConfig>,
}

impl InterfaceConfig {
    pub fn pod_key(&self) -> String {
        namespaced_name(&self.pod_namespace, &self.pod_name)
    }

    /// Identifiers written onto the switch port.
    pub fn external_ids(&self) -> BTreeMap<String, String> {
        let ips = self
            .ips
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(",");
        BTreeMap::from([
            (EXTERNAL_ID_CONTAINER_ID.to_string(), self.container_id.clone()),
            (EXTERNAL_ID_ATTACHED_MAC.to_string(), self.mac.clone()),
            (EXTERNAL_ID_IP_ADDRESS.to_string(), ips),
            (EXTERNAL_ID_POD_NAME.to_string(), self.pod_name.clone()),
            (EXTERNAL_ID_POD_NAMESPACE.to_string(), self.pod_namespace.clone()),
            (EXTERNAL_ID_IFACE_ID.to_string(), self.vif_id.clone()),
        ])
    }

    /// Rebuilds a record from a switch port. Ports without a container id
    /// were not created by the agent.
    pub fn from_port(port: &PortData) -> Option<Self> {
        let ids = &port.external_ids;
        let container_id = ids.get(EXTERNAL_ID_CONTAINER_ID)?.clone();
        let get = |key: &str| ids.get(key).cloned().unwrap_or_default();

        let ips = get(EXTERNAL_ID_IP_ADDRESS)
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| match s.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring invalid IP {:?} on port {}", s, port.name);
                    None
                }
            })
            .collect();

        Some(Self {
            interface_name: port.name.clone(),
            container_id,
            pod_name: get(EXTERNAL_ID_POD_NAME),
            pod_namespace: get(EXTERNAL_ID_POD_NAMESPACE),
            vif_id: get(EXTERNAL_ID_IFACE_ID),
            mac: get(EXTERNAL_ID_ATTACHED_MAC),
            ips,
            ovs_port: Some(OvsPortConfig {
                port_uuid: port.uuid.clone(),
                ofport: port.ofport,
            }),
        })
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    by_name: HashMap<String, InterfaceConfig>,
    by_container: HashMap<String, String>,
}

/// In-memory cache of attached interfaces
#[derive(Debug, Default)]
pub struct InterfaceStore {
    inner: RwLock<StoreInner>,
}

impl InterfaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the cache from the switch's port list.
    pub fn from_ports(ports: &[PortData]) -> Self {
        let store = Self::new();
        for port in ports {
            if let Some(config) = InterfaceConfig::from_port(port) {
                if port.ofport.is_none() {
                    warn!("Port {} has no OpenFlow port", port.name);
                }
                store.add(config);
            }
        }
        store
    }

    /// Records `config`, replacing any record of the same interface name or
    /// the same container.
    pub fn add(&self, config: InterfaceConfig) {
        let mut inner = self.inner.write();
        // A new sandbox of the same pod reuses the host interface name
        if let Some(replaced) = inner.by_name.get(&config.interface_name) {
            if replaced.container_id != config.container_id {
                let stale = replaced.container_id.clone();
                inner.by_container.remove(&stale);
            }
        }
        if let Some(previous) = inner
            .by_container
            .insert(config.container_id.clone(), config.interface_name.clone())
        {
            if previous != config.interface_name {
                inner.by_name.remove(&previous);
            }
        }
        inner.by_name.insert(config.interface_name.clone(), config);
    }

    pub fn delete(&self, interface_name: &str) -> Option<InterfaceConfig> {
        let mut inner = self.inner.write();
        let config = inner.by_name.remove(interface_name)?;
        if inner.by_container.get(&config.container_id).map(String::as_str) == Some(interface_name) {
            inner.by_container.remove(&config.container_id);
        }
        Some(config)
    }

    pub fn get_interface(&self, interface_name: &str) -> Option<InterfaceConfig> {
        self.inner.read().by_name.get(interface_name).cloned()
    }

    pub fn get_container_interface(&self, container_id: &str) -> Option<InterfaceConfig> {
        let inner = self.inner.read();
        let name = inner.by_container.get(container_id)?;
        inner
            .by_name
            .get(name)
            .filter(|config| config.container_id == container_id)
            .cloned()
    }

    /// All records, sorted by interface name.
    pub fn list(&self) -> Vec<InterfaceConfig> {
        let mut configs: Vec<_> = self.inner.read().by_name.values().cloned().collect();
        configs.sort_by(|a, b| a.interface_name.cmp(&b.interface_name));
        configs
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
