//! Switch port connector
//!
//! Ordering rules, to keep a reused OpenFlow port number from inheriting
//! another interface's flows:
//! - flows are installed only once the port exists and its number is known
//! - flows are removed before the port is deleted, and a port whose flows
//!   could not be removed is left in place

use crate::error::SwitchError;
use crate::switch::{BridgeClient, FlowClient};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Switch side of an attached interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port_uuid: String,
    pub ofport: u32,
}

pub struct PortConnector {
    bridge: Arc<dyn BridgeClient>,
    flows: Arc<dyn FlowClient>,
}

impl PortConnector {
    pub fn new(bridge: Arc<dyn BridgeClient>, flows: Arc<dyn FlowClient>) -> Self {
        Self { bridge, flows }
    }

    /// Registers `name` on the bridge and installs its flows. On failure
    /// nothing is left on the switch, unless cleanup fails too, in which case
    /// [`SwitchError::PortLeftAttached`] names the port that remains.
    pub async fn connect(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
        ips: &[IpAddr],
        mac: &str,
    ) -> Result<PortRecord, SwitchError> {
        let port_uuid = self.bridge.create_port(name, external_ids).await?;

        let ofport = match self.bridge.get_ofport(name).await {
            Ok(ofport) => ofport,
            Err(e) => return Err(self.detach_after_failure(name, port_uuid, None, e).await),
        };

        if let Err(e) = self.flows.install_pod_flows(name, ips, mac, ofport).await {
            return Err(self
                .detach_after_failure(name, port_uuid, Some(ofport), e)
                .await);
        }

        debug!("Connected {} as OpenFlow port {}", name, ofport);
        Ok(PortRecord { port_uuid, ofport })
    }

    /// Undoes a partial attach and returns the error to report. Flows are
    /// only touched once `ofport` is known.
    async fn detach_after_failure(
        &self,
        name: &str,
        port_uuid: String,
        ofport: Option<u32>,
        cause: SwitchError,
    ) -> SwitchError {
        let cleanup = match ofport {
            Some(_) => match self.flows.uninstall_pod_flows(name).await {
                Ok(()) => self.bridge.delete_port(&port_uuid).await,
                Err(e) => Err(e),
            },
            None => self.bridge.delete_port(&port_uuid).await,
        };

        match cleanup {
            Ok(()) => cause,
            Err(cleanup) => {
                warn!("Port {} stays on the bridge after failed attach: {}", name, cleanup);
                SwitchError::PortLeftAttached {
                    port: name.to_string(),
                    port_uuid,
                    ofport,
                    source: Box::new(cause),
                    cleanup: Box::new(cleanup),
                }
            }
        }
    }

    /// Removes the flows of `name`, then its port if it has one.
    pub async fn disconnect(&self, name: &str, port_uuid: Option<&str>) -> Result<(), SwitchError> {
        self.flows.uninstall_pod_flows(name).await?;
        if let Some(port_uuid) = port_uuid {
            self.bridge.delete_port(port_uuid).await?;
        }
        debug!("Disconnected {}", name);
        Ok(())
    }

    /// Installs the flows of an already attached port again.
    pub async fn replay_flows(
        &self,
        name: &str,
        ips: &[IpAddr],
        mac: &str,
        ofport: u32,
    ) -> Result<(), SwitchError> {
        self.flows.install_pod_flows(name, ips, mac, ofport).await
    }

    pub async fn ofport(&self, name: &str) -> Result<u32, SwitchError> {
        self.bridge.get_ofport(name).await
    }
}
