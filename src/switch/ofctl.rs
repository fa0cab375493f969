//! Flow client backed by `ovs-ofctl`
//!
//! Every interface gets a small set of table-0 flows sharing one cookie, so
//! they can be removed together without remembering what was installed.

use crate::error::SwitchError;
use crate::switch::{command, FlowClient};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

const OVS_OFCTL: &str = "ovs-ofctl";

const COOKIE_TAG: u64 = 0x1000_0000_0000_0000;
const COOKIE_HASH_MASK: u64 = 0x0fff_ffff_ffff_ffff;

const PRIORITY_ADMIT: u16 = 200;
const PRIORITY_DROP: u16 = 190;
const PRIORITY_DELIVER: u16 = 100;

/// Cookie shared by all flows of the interface `name` (FNV-1a of the name).
pub fn flow_cookie(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    COOKIE_TAG | (hash & COOKIE_HASH_MASK)
}

/// Flows for one interface: traffic from the port is admitted only with its
/// own MAC and IPs, traffic to its MAC is delivered to the port.
fn pod_flows(cookie: u64, ips: &[IpAddr], mac: &str, ofport: u32) -> Vec<String> {
    let admit = |rest: String| {
        format!(
            "cookie={:#x},table=0,priority={},in_port={},dl_src={},{},actions=NORMAL",
            cookie, PRIORITY_ADMIT, ofport, mac, rest
        )
    };

    let mut flows = Vec::new();
    let mut has_v6 = false;
    for ip in ips {
        match ip {
            IpAddr::V4(v4) => {
                flows.push(admit(format!("arp,arp_spa={}", v4)));
                flows.push(admit(format!("ip,nw_src={}", v4)));
            }
            IpAddr::V6(v6) => {
                has_v6 = true;
                flows.push(admit(format!("ipv6,ipv6_src={}", v6)));
            }
        }
    }
    if has_v6 {
        // Neighbor discovery is sourced from link-local addresses
        for icmp_type in [133, 135, 136] {
            flows.push(admit(format!("icmp6,icmp_type={}", icmp_type)));
        }
    }

    flows.push(format!(
        "cookie={:#x},table=0,priority={},in_port={},actions=drop",
        cookie, PRIORITY_DROP, ofport
    ));
    flows.push(format!(
        "cookie={:#x},table=0,priority={},dl_dst={},actions=output:{}",
        cookie, PRIORITY_DELIVER, mac, ofport
    ));
    flows
}

/// Flow programming on one bridge
#[derive(Debug, Clone)]
pub struct OvsOfctlClient {
    bridge: String,
    command_timeout: Duration,
}

impl OvsOfctlClient {
    pub fn new(bridge: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            bridge: bridge.into(),
            command_timeout,
        }
    }
}

#[async_trait]
impl FlowClient for OvsOfctlClient {
    async fn install_pod_flows(
        &self,
        name: &str,
        ips: &[IpAddr],
        mac: &str,
        ofport: u32,
    ) -> Result<(), SwitchError> {
        let flows = pod_flows(flow_cookie(name), ips, &mac.to_ascii_lowercase(), ofport);
        debug!("Installing {} flows for {}", flows.len(), name);

        let input = flows.join("\n") + "\n";
        let args = vec!["add-flows".to_string(), self.bridge.clone(), "-".to_string()];
        command::run(OVS_OFCTL, &args, Some(&input), self.command_timeout)
            .await
            .map_err(|e| SwitchError::InstallFlows {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Installed flows for {} on OpenFlow port {}", name, ofport);
        Ok(())
    }

    async fn uninstall_pod_flows(&self, name: &str) -> Result<(), SwitchError> {
        let args = vec![
            "del-flows".to_string(),
            self.bridge.clone(),
            format!("cookie={:#x}/-1", flow_cookie(name)),
        ];
        command::run(OVS_OFCTL, &args, None, self.command_timeout)
            .await
            .map_err(|e| SwitchError::UninstallFlows {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Uninstalled flows for {}", name);
        Ok(())
    }
}
