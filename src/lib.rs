//! OVS CNI Agent - container network attachment for Open vSwitch nodes
//!
//! This library provides the node agent behind the `ovs-cni` plugin: it builds
//! veth pairs for pod sandboxes, attaches them to an Open vSwitch bridge, and
//! programs per-port flows, serving Add, Del and Check over a local socket.

pub mod cni;
pub mod config;
pub mod error;
pub mod network;
pub mod reconcile;
pub mod routing;
pub mod server;
pub mod store;
pub mod switch;

#[cfg(test)]
mod testing;

pub use error::AppError;
