//! Pod interface configuration
//!
//! Drives the interface builder and the port connector for one container
//! and keeps the interface store in step with what was built.

use crate::cni::RequestContext;
use crate::error::{AppError, InterfaceError, SwitchError};
use crate::network::{BuiltPair, InterfaceBuilder, PairSpec};
use crate::store::{InterfaceConfig, InterfaceStore, OvsPortConfig};
use crate::switch::PortConnector;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// What to build for one container interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfacePlan {
    pub vif_id: String,
    pub pair: PairSpec,
}

impl InterfacePlan {
    pub fn host_ifname(&self) -> &str {
        &self.pair.host_ifname
    }

    fn ips(&self) -> Vec<IpAddr> {
        self.pair.addresses.iter().map(IpNetwork::ip).collect()
    }
}

/// Interface list of a previous result, as passed back on Check
#[derive(Debug, Default, Deserialize)]
struct PrevResult {
    #[serde(default)]
    interfaces: Vec<PrevInterface>,
}

#[derive(Debug, Deserialize)]
struct PrevInterface {
    name: String,
    #[serde(default)]
    mac: String,
}

pub struct PodConfigurator {
    builder: Arc<dyn InterfaceBuilder>,
    connector: PortConnector,
    store: Arc<InterfaceStore>,
}

impl PodConfigurator {
    pub fn new(
        builder: Arc<dyn InterfaceBuilder>,
        connector: PortConnector,
        store: Arc<InterfaceStore>,
    ) -> Self {
        Self {
            builder,
            connector,
            store,
        }
    }

    pub fn store(&self) -> &InterfaceStore {
        &self.store
    }

    /// Builds the pair and attaches it. Whatever was built is removed
    /// again on failure, except a port that could not be detached: that one
    /// is recorded together with its pair.
    pub async fn configure_interface(
        &self,
        ctx: &RequestContext,
        plan: &InterfacePlan,
    ) -> Result<BuiltPair, AppError> {
        let pair = self.builder.build_pair(&plan.pair).await?;

        let mut config = InterfaceConfig {
            interface_name: plan.pair.host_ifname.clone(),
            container_id: ctx.container_id.clone(),
            pod_name: ctx.pod_name.clone(),
            pod_namespace: ctx.pod_namespace.clone(),
            vif_id: plan.vif_id.clone(),
            mac: plan.pair.mac.clone(),
            ips: plan.ips(),
            ovs_port: None,
        };

        let record = match self
            .connector
            .connect(plan.host_ifname(), &config.external_ids(), &config.ips, &config.mac)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if let SwitchError::PortLeftAttached {
                    port_uuid, ofport, ..
                } = &e
                {
                    // Keep the pair with the port so a later Del removes both
                    config.ovs_port = Some(OvsPortConfig {
                        port_uuid: port_uuid.clone(),
                        ofport: *ofport,
                    });
                    self.store.add(config);
                    return Err(e.into());
                }
                if let Err(teardown_err) =
                    self.builder.teardown(&ctx.container_id, plan.host_ifname()).await
                {
                    warn!(
                        "Failed to remove interface {} after failed attach: {}",
                        plan.host_ifname(), teardown_err
                    );
                }
                return Err(e.into());
            }
        };

        config.ovs_port = Some(OvsPortConfig {
            port_uuid: record.port_uuid,
            ofport: Some(record.ofport),
        });
        self.store.add(config);
        info!(
            "Configured interface {} of container {} (OpenFlow port {})",
            plan.host_ifname(), ctx.container_id, record.ofport
        );
        Ok(pair)
    }

    /// Removes everything recorded for the container. Succeeds when there
    /// is nothing to remove. The record is kept when removal fails part-way.
    pub async fn remove_interfaces(&self, container_id: &str) -> Result<(), AppError> {
        let Some(config) = self.store.get_container_interface(container_id) else {
            info!("No interface recorded for container {}, nothing to remove", container_id);
            return Ok(());
        };
        self.remove_interface(&config).await
    }

    pub async fn remove_interface(&self, config: &InterfaceConfig) -> Result<(), AppError> {
        let port_uuid = config.ovs_port.as_ref().map(|p| p.port_uuid.as_str());
        self.connector
            .disconnect(&config.interface_name, port_uuid)
            .await?;
        self.builder
            .teardown(&config.container_id, &config.interface_name)
            .await?;
        self.store.delete(&config.interface_name);
        info!(
            "Removed interface {} of container {}",
            config.interface_name, config.container_id
        );
        Ok(())
    }

    /// Verifies a recorded interface against the kernel, the switch and
    /// the previous result.
    pub async fn check_interfaces(
        &self,
        ctx: &RequestContext,
        config: &InterfaceConfig,
    ) -> Result<(), AppError> {
        self.builder
            .check_pair(&config.interface_name, &ctx.netns, &ctx.ifname, &config.mac)
            .await?;

        let ofport = self.connector.ofport(&config.interface_name).await?;
        if let Some(recorded) = config.ovs_port.as_ref().and_then(|p| p.ofport) {
            if recorded != ofport {
                return Err(InterfaceError::Check(format!(
                    "port {} moved from OpenFlow port {} to {}",
                    config.interface_name, recorded, ofport
                ))
                .into());
            }
        }

        if let Some(prev) = &ctx.network.prev_result {
            check_prev_result(prev, &ctx.ifname, &config.mac)?;
        }
        Ok(())
    }

    /// Installs the flows of a recorded interface again. A port recorded
    /// without an OpenFlow number is asked for one first.
    pub async fn reconnect(&self, config: &InterfaceConfig) -> Result<(), AppError> {
        let Some(port) = &config.ovs_port else {
            return Err(InterfaceError::Check(format!(
                "interface {} has no switch port",
                config.interface_name
            ))
            .into());
        };
        let ofport = match port.ofport {
            Some(ofport) => ofport,
            None => self.connector.ofport(&config.interface_name).await?,
        };
        self.connector
            .replay_flows(&config.interface_name, &config.ips, &config.mac, ofport)
            .await?;
        Ok(())
    }
}

fn check_prev_result(prev: &serde_json::Value, ifname: &str, mac: &str) -> Result<(), InterfaceError> {
    let prev = PrevResult::deserialize(prev)
        .map_err(|e| InterfaceError::Check(format!("invalid prevResult: {}", e)))?;
    for interface in prev.interfaces.iter().filter(|i| i.name == ifname) {
        if !interface.mac.is_empty() && !interface.mac.eq_ignore_ascii_case(mac) {
            return Err(InterfaceError::Check(format!(
                "interface {} has MAC {} in prevResult, expected {}",
                ifname, interface.mac, mac
            )));
        }
    }
    Ok(())
}
