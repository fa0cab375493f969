//! Route management using rtnetlink

use crate::error::RouteError;
use crate::routing::{RouteEntry, RouteManager};
use ipnetwork::IpNetwork;
use rtnetlink::{Handle, RouteMessageBuilder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Route manager implementation using rtnetlink.
///
/// The handle decides which namespace is programmed: it must come from a
/// connection opened inside the target namespace.
pub struct RtNetlinkRouteManager {
    handle: Handle,
}

impl RtNetlinkRouteManager {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl RouteManager for RtNetlinkRouteManager {
    async fn add_address(&self, link_index: u32, address: &IpNetwork) -> Result<(), RouteError> {
        self.handle
            .address()
            .add(link_index, address.ip(), address.prefix())
            .execute()
            .await
            .map_err(|e| RouteError::AddAddress(format!("{}: {}", address, e)))
    }

    async fn add_route(&self, link_index: u32, route: &RouteEntry) -> Result<(), RouteError> {
        let message = match (route.destination, route.gateway) {
            (IpNetwork::V4(dst), IpAddr::V4(gw)) => RouteMessageBuilder::<Ipv4Addr>::new()
                .destination_prefix(dst.network(), dst.prefix())
                .gateway(gw)
                .output_interface(link_index)
                .build(),
            (IpNetwork::V6(dst), IpAddr::V6(gw)) => RouteMessageBuilder::<Ipv6Addr>::new()
                .destination_prefix(dst.network(), dst.prefix())
                .gateway(gw)
                .output_interface(link_index)
                .build(),
            _ => {
                return Err(RouteError::InvalidRoute(format!(
                    "IP version mismatch between {} and {}",
                    route.destination, route.gateway
                )))
            }
        };

        self.handle
            .route()
            .add(message)
            .execute()
            .await
            .map_err(|e| RouteError::AddRoute(format!("{} via {}: {}", route.destination, route.gateway, e)))
    }
}
