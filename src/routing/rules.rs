//! Address and route calculation from VIF subnet data

use crate::error::RouteError;
use crate::routing::RouteEntry;
use crate::store::descriptor::{VifEntry, VifSubnet};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

const DEFAULT_V4_DESTINATION: &str = "0.0.0.0/0";
const DEFAULT_V6_DESTINATION: &str = "::/0";

/// One address assigned to the container interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedAddress {
    /// Assigned IP carrying the subnet's prefix length
    pub address: IpNetwork,
    pub gateway: Option<IpAddr>,
}

/// Everything the container side needs from one VIF
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VifAddressing {
    pub addresses: Vec<AssignedAddress>,
    pub routes: Vec<RouteEntry>,
    pub dns: Vec<String>,
}

impl VifAddressing {
    pub fn ips(&self) -> Vec<IpAddr> {
        self.addresses.iter().map(|a| a.address.ip()).collect()
    }

    pub fn merge(&mut self, other: VifAddressing) {
        self.addresses.extend(other.addresses);
        for route in other.routes {
            if !self.routes.contains(&route) {
                self.routes.push(route);
            }
        }
        for server in other.dns {
            if !self.dns.contains(&server) {
                self.dns.push(server);
            }
        }
    }
}

/// Routing rule calculator
#[derive(Debug, Default)]
pub struct RoutingRuleCalculator;

impl RoutingRuleCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Calculate the route to `destination_cidr` through `gateway_ip`
    pub fn calculate_route(
        &self,
        destination_cidr: &str,
        gateway_ip: IpAddr,
    ) -> Result<RouteEntry, RouteError> {
        let network = destination_cidr
            .parse::<IpNetwork>()
            .map_err(|e| RouteError::InvalidRoute(format!("{}: {}", destination_cidr, e)))?;

        // Normalise to the network address so 10.0.0.7/24 and 10.0.0.0/24 compare equal
        let destination = IpNetwork::new(network.network(), network.prefix())
            .map_err(|e| RouteError::InvalidRoute(e.to_string()))?;

        let route = RouteEntry {
            destination,
            gateway: gateway_ip,
        };
        self.validate_route(&route)?;
        Ok(route)
    }

    /// Addresses, routes and DNS servers for one VIF entry
    pub fn vif_addressing(&self, entry: &VifEntry) -> Result<VifAddressing, RouteError> {
        let mut addressing = VifAddressing::default();
        for subnet in &entry.vif.network.subnets {
            let subnet_addressing = self.subnet_addressing(subnet, entry.is_default)?;
            addressing.merge(subnet_addressing);
        }
        Ok(addressing)
    }

    fn subnet_addressing(
        &self,
        subnet: &VifSubnet,
        is_default: bool,
    ) -> Result<VifAddressing, RouteError> {
        let cidr = subnet
            .cidr
            .parse::<IpNetwork>()
            .map_err(|e| RouteError::InvalidRoute(format!("subnet {}: {}", subnet.cidr, e)))?;

        let gateway = match subnet.gateway.trim() {
            "" => None,
            gw => Some(gw.parse::<IpAddr>().map_err(|e| {
                RouteError::InvalidRoute(format!("gateway {}: {}", subnet.gateway, e))
            })?),
        };

        let mut addressing = VifAddressing {
            dns: subnet.dns.clone(),
            ..Default::default()
        };

        for fixed_ip in &subnet.ips {
            let ip = fixed_ip.ip_address.parse::<IpAddr>().map_err(|e| {
                RouteError::InvalidRoute(format!("address {}: {}", fixed_ip.ip_address, e))
            })?;
            if ip.is_ipv4() != cidr.is_ipv4() || !cidr.contains(ip) {
                return Err(RouteError::InvalidRoute(format!(
                    "address {} is outside subnet {}",
                    ip, subnet.cidr
                )));
            }
            let address = IpNetwork::new(ip, cidr.prefix())
                .map_err(|e| RouteError::InvalidRoute(e.to_string()))?;
            addressing.addresses.push(AssignedAddress { address, gateway });
        }

        if let (true, Some(gw)) = (is_default, gateway) {
            let destination = if gw.is_ipv4() {
                DEFAULT_V4_DESTINATION
            } else {
                DEFAULT_V6_DESTINATION
            };
            addressing.routes.push(self.calculate_route(destination, gw)?);
        }

        for static_route in &subnet.routes {
            let gw = static_route.gateway.parse::<IpAddr>().map_err(|e| {
                RouteError::InvalidRoute(format!("gateway {}: {}", static_route.gateway, e))
            })?;
            addressing
                .routes
                .push(self.calculate_route(&static_route.cidr, gw)?);
        }

        Ok(addressing)
    }

    /// Validate route configuration
    pub fn validate_route(&self, route: &RouteEntry) -> Result<(), RouteError> {
        match (&route.destination, &route.gateway) {
            (IpNetwork::V4(_), IpAddr::V4(_)) => Ok(()),
            (IpNetwork::V6(_), IpAddr::V6(_)) => Ok(()),
            _ => Err(RouteError::InvalidRoute(
                "IP version mismatch between destination and gateway".to_string(),
            )),
        }
    }
}
