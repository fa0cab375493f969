//! Routing table management module
//!
//! Computes addresses and routes from VIF subnet data and programs them
//! inside container network namespaces

use crate::error::RouteError;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

pub mod manager;
pub mod rules;

/// Route entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: IpNetwork,
    pub gateway: IpAddr,
}

/// Route manager trait
pub trait RouteManager {
    fn add_address(
        &self,
        link_index: u32,
        address: &IpNetwork,
    ) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
    fn add_route(
        &self,
        link_index: u32,
        route: &RouteEntry,
    ) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
}
