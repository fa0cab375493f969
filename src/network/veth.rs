//! Veth pair construction with rtnetlink

use crate::error::InterfaceError;
use crate::network::namespace::NamespaceManager;
use crate::network::{format_mac, parse_mac, BuiltPair, InterfaceBuilder, InterfaceRef, PairSpec};
use crate::routing::manager::RtNetlinkRouteManager;
use crate::routing::RouteManager;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::{Handle, LinkUnspec, LinkVeth};
use tracing::{debug, info, warn};

const ENODEV: i32 = 19;

fn is_not_found(err: &rtnetlink::Error) -> bool {
    matches!(err, rtnetlink::Error::NetlinkError(msg) if msg.raw_code() == -ENODEV)
}

fn link_mac(link: &LinkMessage) -> String {
    link.attributes
        .iter()
        .find_map(|attr| match attr {
            LinkAttribute::Address(bytes) => Some(format_mac(bytes)),
            _ => None,
        })
        .unwrap_or_default()
}

async fn find_link(handle: &Handle, name: &str) -> Result<Option<LinkMessage>, rtnetlink::Error> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(link) => Ok(link),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn require_link(handle: &Handle, name: &str) -> Result<LinkMessage, InterfaceError> {
    find_link(handle, name)
        .await
        .map_err(|e| InterfaceError::LinkConfigure {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| InterfaceError::LinkNotFound {
            name: name.to_string(),
        })
}

/// The container end is created in the host namespace under this name and
/// renamed once moved, so it never clashes with host interfaces.
fn temporary_peer_name(host_ifname: &str) -> String {
    let base: String = host_ifname.chars().take(14).collect();
    format!("{}p", base)
}

/// Interface builder talking to the kernel over netlink
pub struct NetlinkInterfaceBuilder {
    handle: Handle,
}

impl NetlinkInterfaceBuilder {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Opens a netlink connection in the agent's own namespace.
    pub fn connect() -> Result<Self, InterfaceError> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| InterfaceError::NamespaceAccess {
                path: "host".to_string(),
                reason: e.to_string(),
            })?;
        tokio::spawn(connection);
        Ok(Self::new(handle))
    }

    async fn create_and_configure(
        &self,
        spec: &PairSpec,
        mac: Vec<u8>,
        peer_name: &str,
    ) -> Result<BuiltPair, InterfaceError> {
        let netns = NamespaceManager::open(&spec.netns)?;
        let configure = |name: &str, e: rtnetlink::Error| InterfaceError::LinkConfigure {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let host = require_link(&self.handle, &spec.host_ifname).await?;
        let mut host_settings = LinkUnspec::new_with_index(host.header.index);
        if spec.mtu > 0 {
            host_settings = host_settings.mtu(spec.mtu);
        }
        self.handle
            .link()
            .set(host_settings.up().build())
            .execute()
            .await
            .map_err(|e| configure(&spec.host_ifname, e))?;

        let peer = require_link(&self.handle, peer_name).await?;
        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(peer.header.index)
                    .setns_by_fd(netns.fd())
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| configure(peer_name, e))?;
        debug!("Moved {} into {}", peer_name, netns.path());

        let ns_handle = netns.netlink_handle()?;
        let peer = require_link(&ns_handle, peer_name).await?;
        let index = peer.header.index;

        let mut container_settings = LinkUnspec::new_with_index(index)
            .name(spec.container_ifname.clone())
            .address(mac);
        if spec.mtu > 0 {
            container_settings = container_settings.mtu(spec.mtu);
        }
        ns_handle
            .link()
            .set(container_settings.build())
            .execute()
            .await
            .map_err(|e| configure(&spec.container_ifname, e))?;
        ns_handle
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await
            .map_err(|e| configure(&spec.container_ifname, e))?;

        let routes = RtNetlinkRouteManager::new(ns_handle);
        for address in &spec.addresses {
            routes.add_address(index, address).await?;
        }
        for route in &spec.routes {
            routes.add_route(index, route).await?;
        }

        let host = require_link(&self.handle, &spec.host_ifname).await?;
        Ok(BuiltPair {
            host: InterfaceRef {
                name: spec.host_ifname.clone(),
                mac: link_mac(&host),
                sandbox: String::new(),
            },
            container: InterfaceRef {
                name: spec.container_ifname.clone(),
                mac: spec.mac.to_ascii_lowercase(),
                sandbox: spec.netns.clone(),
            },
        })
    }
}

#[async_trait]
impl InterfaceBuilder for NetlinkInterfaceBuilder {
    async fn build_pair(&self, spec: &PairSpec) -> Result<BuiltPair, InterfaceError> {
        let mac = parse_mac(&spec.mac)?;
        let peer_name = temporary_peer_name(&spec.host_ifname);

        let mut veth = LinkVeth::new(&spec.host_ifname, &peer_name);
        if spec.mtu > 0 {
            veth = veth.mtu(spec.mtu);
        }
        self.handle
            .link()
            .add(veth.build())
            .execute()
            .await
            .map_err(|e| InterfaceError::LinkCreate {
                name: spec.host_ifname.clone(),
                reason: e.to_string(),
            })?;
        debug!("Created veth pair {} <-> {}", spec.host_ifname, peer_name);

        match self.create_and_configure(spec, mac, &peer_name).await {
            Ok(pair) => {
                info!(
                    "Built interface pair {} <-> {}:{} for container {}",
                    spec.host_ifname, spec.netns, spec.container_ifname, spec.container_id
                );
                Ok(pair)
            }
            Err(e) => {
                // Deleting the host end removes the peer wherever it ended up
                if let Err(teardown_err) = self.teardown(&spec.container_id, &spec.host_ifname).await {
                    warn!(
                        "Failed to remove partially built pair {}: {}",
                        spec.host_ifname, teardown_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn teardown(&self, container_id: &str, host_ifname: &str) -> Result<(), InterfaceError> {
        let delete = |e: rtnetlink::Error| InterfaceError::LinkDelete {
            name: host_ifname.to_string(),
            reason: e.to_string(),
        };

        let Some(link) = find_link(&self.handle, host_ifname).await.map_err(delete)? else {
            debug!("Link {} of container {} already gone", host_ifname, container_id);
            return Ok(());
        };

        match self.handle.link().del(link.header.index).execute().await {
            Ok(()) => {
                info!("Removed interface {} of container {}", host_ifname, container_id);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(delete(e)),
        }
    }

    async fn check_pair(
        &self,
        host_ifname: &str,
        netns: &str,
        container_ifname: &str,
        mac: &str,
    ) -> Result<(), InterfaceError> {
        require_link(&self.handle, host_ifname).await?;

        let ns_handle = NamespaceManager::open(netns)?.netlink_handle()?;
        let container = require_link(&ns_handle, container_ifname).await?;

        let expected = format_mac(&parse_mac(mac)?);
        let actual = link_mac(&container);
        if actual != expected {
            return Err(InterfaceError::Check(format!(
                "interface {} has MAC {}, expected {}",
                container_ifname, actual, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_peer_name_fits_kernel_limit() {
        assert_eq!(temporary_peer_name("tap0123456789a"), "tap0123456789ap");
        assert_eq!(temporary_peer_name("tap0123456789abcdef").len(), 15);
    }

    #[test]
    fn test_link_mac() {
        let mut link = LinkMessage::default();
        assert_eq!(link_mac(&link), "");
        link.attributes
            .push(LinkAttribute::Address(vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        assert_eq!(link_mac(&link), "aa:bb:cc:dd:ee:ff");
    }
}
