//! Network operations module
//!
//! Builds and removes the veth pair connecting a container's network
//! namespace to the host, and verifies it on Check.

use crate::error::InterfaceError;
use crate::routing::RouteEntry;
use async_trait::async_trait;
use ipnetwork::IpNetwork;

pub mod namespace;
pub mod veth;

pub use veth::NetlinkInterfaceBuilder;

/// Kernel limit on interface names, minus the trailing NUL
const MAX_IFNAME_LEN: usize = 15;
const HOST_IFNAME_PREFIX: &str = "tap";

/// Host-side interface name for a VIF: `tap` + at most 11 bytes of its port
/// id, cut on a character boundary.
pub fn host_interface_name(vif_id: &str) -> String {
    let keep = MAX_IFNAME_LEN - HOST_IFNAME_PREFIX.len() - 1;
    let mut end = vif_id.len().min(keep);
    while !vif_id.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", HOST_IFNAME_PREFIX, &vif_id[..end])
}

/// Parameters of one veth pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub container_id: String,
    pub host_ifname: String,
    /// Namespace path as seen from the agent
    pub netns: String,
    pub container_ifname: String,
    /// 0 keeps the kernel default
    pub mtu: u32,
    pub mac: String,
    pub addresses: Vec<IpNetwork>,
    pub routes: Vec<RouteEntry>,
}

/// One end of a built pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceRef {
    pub name: String,
    pub mac: String,
    /// Namespace path, empty for the host side
    pub sandbox: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPair {
    pub host: InterfaceRef,
    pub container: InterfaceRef,
}

/// OS-level link manipulation
#[async_trait]
pub trait InterfaceBuilder: Send + Sync {
    /// Creates the pair, moves one end into the namespace and configures it.
    /// Nothing is left behind on failure.
    async fn build_pair(&self, spec: &PairSpec) -> Result<BuiltPair, InterfaceError>;

    /// Removes the pair. Succeeds when it is already gone.
    async fn teardown(&self, container_id: &str, host_ifname: &str) -> Result<(), InterfaceError>;

    /// Verifies both ends exist and the container end carries `mac`.
    async fn check_pair(
        &self,
        host_ifname: &str,
        netns: &str,
        container_ifname: &str,
        mac: &str,
    ) -> Result<(), InterfaceError>;
}

/// Parses `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(mac: &str) -> Result<Vec<u8>, InterfaceError> {
    let bytes = mac
        .split(':')
        .map(|octet| {
            if octet.len() == 2 {
                u8::from_str_radix(octet, 16).ok()
            } else {
                None
            }
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| InterfaceError::InvalidMac(mac.to_string()))?;

    if bytes.len() != 6 {
        return Err(InterfaceError::InvalidMac(mac.to_string()));
    }
    Ok(bytes)
}

pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
