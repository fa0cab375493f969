//! Virtual switch module
//!
//! Port registration on the integration bridge, per-port flow programming,
//! and the connector that sequences the two.

use crate::error::SwitchError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;

mod command;
pub mod connector;
pub mod ofctl;
pub mod vsctl;

pub use connector::{PortConnector, PortRecord};

pub const EXTERNAL_ID_CONTAINER_ID: &str = "container-id";
pub const EXTERNAL_ID_ATTACHED_MAC: &str = "attached-mac";
pub const EXTERNAL_ID_IP_ADDRESS: &str = "ip-address";
pub const EXTERNAL_ID_POD_NAME: &str = "pod-name";
pub const EXTERNAL_ID_POD_NAMESPACE: &str = "pod-namespace";
pub const EXTERNAL_ID_IFACE_ID: &str = "iface-id";

/// Port as reported by the switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortData {
    pub uuid: String,
    pub name: String,
    pub ofport: Option<u32>,
    pub external_ids: BTreeMap<String, String>,
}

/// Port table operations on one bridge
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Adds `name` to the bridge and returns the port UUID.
    async fn create_port(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
    ) -> Result<String, SwitchError>;

    async fn delete_port(&self, port_uuid: &str) -> Result<(), SwitchError>;

    /// OpenFlow port number, waiting briefly for the switch to assign one.
    async fn get_ofport(&self, name: &str) -> Result<u32, SwitchError>;

    async fn list_ports(&self) -> Result<Vec<PortData>, SwitchError>;
}

/// Forwarding rules for one attached interface
#[async_trait]
pub trait FlowClient: Send + Sync {
    async fn install_pod_flows(
        &self,
        name: &str,
        ips: &[IpAddr],
        mac: &str,
        ofport: u32,
    ) -> Result<(), SwitchError>;

    /// Removing flows of an unknown interface is not an error.
    async fn uninstall_pod_flows(&self, name: &str) -> Result<(), SwitchError>;
}
