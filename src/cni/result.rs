//! CNI result returned to the runtime on a successful Add

use crate::routing::rules::VifAddressing;
use crate::routing::RouteEntry;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Index of the container-side interface in [`CniResult::interfaces`].
pub const CONTAINER_INTERFACE_INDEX: usize = 1;

/// DNS configuration, shared by the network configuration and the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpConfig {
    /// "4" or "6"
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    #[serde(serialize_with = "serialize_display")]
    pub address: IpNetwork,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    #[serde(serialize_with = "serialize_display")]
    pub dst: IpNetwork,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

impl From<&RouteEntry> for Route {
    fn from(entry: &RouteEntry) -> Self {
        Route {
            dst: entry.destination,
            gw: Some(entry.gateway),
        }
    }
}

/// Result in the current (0.3.x / 0.4.0) layout; older versions are
/// converted when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CniResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

impl CniResult {
    pub fn new(cni_version: impl Into<String>) -> Self {
        Self {
            cni_version: cni_version.into(),
            interfaces: Vec::new(),
            ips: Vec::new(),
            routes: Vec::new(),
            dns: Dns::default(),
        }
    }

    /// Records the host-side and container-side interfaces, in that order.
    pub fn set_interfaces(&mut self, host: Interface, container: Interface) {
        self.interfaces = vec![host, container];
    }

    /// Appends the IP configurations and routes computed for one VIF.
    pub fn add_addressing(&mut self, addressing: &VifAddressing) {
        for assigned in &addressing.addresses {
            let version = if assigned.address.is_ipv4() { "4" } else { "6" };
            self.ips.push(IpConfig {
                version: version.to_string(),
                interface: Some(CONTAINER_INTERFACE_INDEX),
                address: assigned.address,
                gateway: assigned.gateway,
            });
        }
        for entry in &addressing.routes {
            let route = Route::from(entry);
            if !self.routes.contains(&route) {
                self.routes.push(route);
            }
        }
        if self.dns.nameservers.is_empty() {
            self.dns.nameservers = addressing.dns.clone();
        }
    }

    pub fn container_addresses(&self) -> Vec<IpNetwork> {
        self.ips.iter().map(|ip| ip.address).collect()
    }

    /// Serializes the result in the layout of its CNI version.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self.cni_version.as_str() {
            "0.1.0" | "0.2.0" => serde_json::to_vec(&LegacyResult::from_current(self)),
            _ => serde_json::to_vec(self),
        }
    }
}

/// Pre-0.3.0 layout: one IPv4 and one IPv6 block, no interface list.
#[derive(Serialize)]
struct LegacyResult<'a> {
    #[serde(rename = "cniVersion")]
    cni_version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip4: Option<LegacyIpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip6: Option<LegacyIpConfig>,
    #[serde(skip_serializing_if = "Dns::is_empty")]
    dns: &'a Dns,
}

#[derive(Serialize)]
struct LegacyIpConfig {
    #[serde(serialize_with = "serialize_display")]
    ip: IpNetwork,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<IpAddr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<Route>,
}

impl<'a> LegacyResult<'a> {
    fn from_current(result: &'a CniResult) -> Self {
        let block = |v4: bool| {
            result
                .ips
                .iter()
                .find(|ip| ip.address.is_ipv4() == v4)
                .map(|ip| LegacyIpConfig {
                    ip: ip.address,
                    gateway: ip.gateway,
                    routes: result
                        .routes
                        .iter()
                        .filter(|r| r.dst.is_ipv4() == v4)
                        .cloned()
                        .collect(),
                })
        };
        LegacyResult {
            cni_version: &result.cni_version,
            ip4: block(true),
            ip6: block(false),
            dns: &result.dns,
        }
    }
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::rules::AssignedAddress;
    use serde_json::Value;

    fn addressing() -> VifAddressing {
        VifAddressing {
            addresses: vec![AssignedAddress {
                address: "10.0.0.5/24".parse().unwrap(),
                gateway: Some("10.0.0.1".parse().unwrap()),
            }],
            routes: vec![RouteEntry {
                destination: "0.0.0.0/0".parse().unwrap(),
                gateway: "10.0.0.1".parse().unwrap(),
            }],
            dns: vec!["10.0.0.2".to_string()],
        }
    }

    #[test]
    fn test_current_layout() {
        let mut result = CniResult::new("0.4.0");
        result.set_interfaces(
            Interface {
                name: "tapabcdef01234".to_string(),
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                sandbox: String::new(),
            },
            Interface {
                name: "eth0".to_string(),
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                sandbox: "/var/run/netns/c1".to_string(),
            },
        );
        result.add_addressing(&addressing());

        let json: Value = serde_json::from_slice(&result.to_bytes().unwrap()).unwrap();
        assert_eq!(json["cniVersion"], "0.4.0");
        assert_eq!(json["interfaces"][1]["sandbox"], "/var/run/netns/c1");
        assert!(json["interfaces"][0].get("sandbox").is_none());
        assert_eq!(json["ips"][0]["version"], "4");
        assert_eq!(json["ips"][0]["interface"], 1);
        assert_eq!(json["ips"][0]["address"], "10.0.0.5/24");
        assert_eq!(json["ips"][0]["gateway"], "10.0.0.1");
        assert_eq!(json["routes"][0]["dst"], "0.0.0.0/0");
        assert_eq!(json["dns"]["nameservers"][0], "10.0.0.2");
    }

    #[test]
    fn test_legacy_layout() {
        let mut result = CniResult::new("0.2.0");
        result.add_addressing(&addressing());

        let json: Value = serde_json::from_slice(&result.to_bytes().unwrap()).unwrap();
        assert_eq!(json["ip4"]["ip"], "10.0.0.5/24");
        assert_eq!(json["ip4"]["gateway"], "10.0.0.1");
        assert_eq!(json["ip4"]["routes"][0]["gw"], "10.0.0.1");
        assert!(json.get("ip6").is_none());
        assert!(json.get("ips").is_none());
    }

    #[test]
    fn test_duplicate_routes_are_collapsed() {
        let mut result = CniResult::new("0.4.0");
        result.add_addressing(&addressing());
        result.add_addressing(&addressing());
        assert_eq!(result.ips.len(), 2);
        assert_eq!(result.routes.len(), 1);
    }
}
