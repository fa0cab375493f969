//! CNI server module
//!
//! The request engine behind the agent socket: Add, Del and Check handling
//! under per-container arbitration, with rollback of failed Adds.

use crate::cni::result::Interface;
use crate::cni::{
    is_cni_version_supported, CniCmdArgs, CniCmdResponse, CniRequest, CniResult, ErrorCode,
    RequestContext, SUPPORTED_CNI_VERSIONS,
};
use crate::error::{CniError, DescriptorError};
use crate::network::{host_interface_name, PairSpec};
use crate::routing::rules::{RoutingRuleCalculator, VifAddressing};
use crate::store::descriptor::{DescriptorLister, VifEntry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod arbitrator;
pub mod configurator;
pub mod listener;
pub mod ready;

pub use arbitrator::{ContainerArbitrator, ContainerGuard};
pub use configurator::{InterfacePlan, PodConfigurator};
pub use listener::CniListener;
pub use ready::{network_readiness, ReadySignal, ReadyWaiter};

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Prepended to namespace paths when the agent runs in a container
    pub host_proc_path_prefix: String,
    pub network_ready_timeout: Duration,
    /// Bound on waiting for a busy container; `None` waits forever
    pub lock_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host_proc_path_prefix: String::new(),
            network_ready_timeout: Duration::from_secs(30),
            lock_timeout: None,
        }
    }
}

pub struct CniServer {
    options: ServerOptions,
    arbitrator: Arc<ContainerArbitrator>,
    ready: ReadyWaiter,
    descriptors: Arc<dyn DescriptorLister>,
    configurator: Arc<PodConfigurator>,
}

impl CniServer {
    pub fn new(
        options: ServerOptions,
        arbitrator: Arc<ContainerArbitrator>,
        ready: ReadyWaiter,
        descriptors: Arc<dyn DescriptorLister>,
        configurator: Arc<PodConfigurator>,
    ) -> Self {
        Self {
            options,
            arbitrator,
            ready,
            descriptors,
            configurator,
        }
    }

    pub fn arbitrator(&self) -> &Arc<ContainerArbitrator> {
        &self.arbitrator
    }

    /// Handles one request. Never fails: errors become error responses.
    pub async fn handle(&self, request: CniRequest) -> CniCmdResponse {
        let command = request.command();
        let args = request.cni_args();
        info!(
            "Received {} request for container {} ({})",
            command, args.container_id, args.ifname
        );

        let outcome = match &request {
            CniRequest::Add(req) => self.cmd_add(&req.cni_args).await,
            CniRequest::Del(req) => self.cmd_del(&req.cni_args).await,
            CniRequest::Check(req) => self.cmd_check(&req.cni_args).await,
        };

        match outcome {
            Ok(result) => {
                info!("{} request for container {} succeeded", command, args.container_id);
                CniCmdResponse::success(result)
            }
            Err(e) => {
                error!(
                    "{} request for container {} failed: {}",
                    command, args.container_id, e
                );
                e.into()
            }
        }
    }

    /// Decoding and version check; no lock is taken before both pass.
    fn decode(&self, args: &CniCmdArgs) -> Result<RequestContext, CniError> {
        let ctx = RequestContext::decode(args, &self.options.host_proc_path_prefix)?;
        if !is_cni_version_supported(&ctx.cni_version) {
            return Err(CniError::new(
                ErrorCode::IncompatibleCniVersion,
                format!(
                    "Unsupported CNI version [{}], supported versions [{}]",
                    ctx.cni_version,
                    SUPPORTED_CNI_VERSIONS.join(", ")
                ),
            ));
        }
        Ok(ctx)
    }

    async fn lock(&self, ctx: &RequestContext) -> Result<ContainerGuard, CniError> {
        let acquire = self.arbitrator.lock(&ctx.infra_container_id);
        match self.options.lock_timeout {
            None => Ok(acquire.await),
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                warn!(
                    "Container {} still busy after {:?}",
                    ctx.infra_container_id, limit
                );
                CniError::try_again_later()
            }),
        }
    }

    async fn cmd_add(&self, args: &CniCmdArgs) -> Result<Vec<u8>, CniError> {
        let ctx = self.decode(args)?;

        if !self.ready.wait(self.options.network_ready_timeout).await {
            warn!(
                "Node network not ready after {:?}, asking runtime to retry",
                self.options.network_ready_timeout
            );
            return Err(CniError::try_again_later());
        }

        let _guard = self.lock(&ctx).await?;
        let (mut result, plan) = self.resolve(&ctx).await?;

        if !ctx.is_infra {
            // Workload containers share the sandbox's interface
            if let Some(existing) = self
                .configurator
                .store()
                .get_container_interface(&ctx.infra_container_id)
            {
                result.set_interfaces(
                    host_interface(&existing.interface_name, ""),
                    container_interface(&ctx, &existing.mac),
                );
            }
            return serialize(&result);
        }

        if let Some(existing) = self
            .configurator
            .store()
            .get_container_interface(&ctx.container_id)
        {
            info!(
                "Container {} already has interface {}",
                ctx.container_id, existing.interface_name
            );
            result.set_interfaces(
                host_interface(&existing.interface_name, ""),
                container_interface(&ctx, &existing.mac),
            );
            return serialize(&result);
        }

        match self.attach(&ctx, &plan, result).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(
                    "Rolling back interfaces of container {}: {}",
                    ctx.container_id, e
                );
                if let Err(rollback_err) =
                    self.configurator.remove_interfaces(&ctx.container_id).await
                {
                    error!(
                        "Rollback of container {} failed: {}",
                        ctx.container_id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn attach(
        &self,
        ctx: &RequestContext,
        plan: &InterfacePlan,
        mut result: CniResult,
    ) -> Result<Vec<u8>, CniError> {
        let pair = self
            .configurator
            .configure_interface(ctx, plan)
            .await
            .map_err(CniError::config_interface_failure)?;

        result.set_interfaces(
            host_interface(&pair.host.name, &pair.host.mac),
            Interface {
                name: pair.container.name,
                mac: pair.container.mac,
                sandbox: pair.container.sandbox,
            },
        );
        serialize(&result)
    }

    /// Looks up the pod's descriptor and computes the result and the
    /// interface to build. The first matching VIF defines the link; every
    /// matching VIF contributes addresses and routes.
    async fn resolve(&self, ctx: &RequestContext) -> Result<(CniResult, InterfacePlan), CniError> {
        let descriptor = self
            .descriptors
            .get(&ctx.pod_namespace, &ctx.pod_name)
            .await?;
        let vifs: Vec<&VifEntry> = descriptor.matching_vifs(&ctx.ifname).collect();
        let Some(first) = vifs.first() else {
            return Err(DescriptorError::NoMatchingVif {
                namespace: ctx.pod_namespace.clone(),
                name: ctx.pod_name.clone(),
                ifname: ctx.ifname.clone(),
            }
            .into());
        };
        if vifs.len() > 1 {
            debug!(
                "{} VIFs match {} of pod {}",
                vifs.len(),
                ctx.ifname,
                ctx.pod_key()
            );
        }

        let calculator = RoutingRuleCalculator::new();
        let mut addressing = VifAddressing::default();
        for entry in &vifs {
            let vif_addressing = calculator
                .vif_addressing(entry)
                .map_err(|e| CniError::new(ErrorCode::InvalidNetworkConfig, e.to_string()))?;
            addressing.merge(vif_addressing);
        }

        let mut result = CniResult::new(ctx.cni_version.clone());
        result.dns = ctx.network.effective_dns();
        result.add_addressing(&addressing);

        let network = &first.vif.network;
        let mtu = if network.mtu > 0 {
            network.mtu
        } else {
            ctx.network.mtu.unwrap_or(0)
        };
        let plan = InterfacePlan {
            vif_id: first.vif.id.clone(),
            pair: PairSpec {
                container_id: ctx.container_id.clone(),
                host_ifname: host_interface_name(&first.vif.id),
                netns: ctx.netns.clone(),
                container_ifname: ctx.ifname.clone(),
                mtu,
                mac: first.vif.mac_address.to_ascii_lowercase(),
                addresses: result.container_addresses(),
                routes: addressing.routes,
            },
        };
        Ok((result, plan))
    }

    async fn cmd_del(&self, args: &CniCmdArgs) -> Result<Vec<u8>, CniError> {
        let ctx = self.decode(args)?;
        let _guard = self.lock(&ctx).await?;
        if !ctx.is_infra {
            debug!("Container {} shares a sandbox, nothing to remove", ctx.container_id);
            return Ok(Vec::new());
        }
        self.configurator
            .remove_interfaces(&ctx.container_id)
            .await
            .map_err(CniError::config_interface_failure)?;
        Ok(Vec::new())
    }

    async fn cmd_check(&self, args: &CniCmdArgs) -> Result<Vec<u8>, CniError> {
        let ctx = self.decode(args)?;
        let _guard = self.lock(&ctx).await?;
        if !ctx.is_infra {
            return Ok(Vec::new());
        }
        let Some(config) = self
            .configurator
            .store()
            .get_container_interface(&ctx.container_id)
        else {
            return Err(CniError::new(
                ErrorCode::UnknownContainer,
                format!("Container {} is unknown", ctx.container_id),
            ));
        };
        self.configurator
            .check_interfaces(&ctx, &config)
            .await
            .map_err(CniError::check_interface_failure)?;
        Ok(Vec::new())
    }
}

fn host_interface(name: &str, mac: &str) -> Interface {
    Interface {
        name: name.to_string(),
        mac: mac.to_string(),
        sandbox: String::new(),
    }
}

fn container_interface(ctx: &RequestContext, mac: &str) -> Interface {
    Interface {
        name: ctx.ifname.clone(),
        mac: mac.to_string(),
        sandbox: ctx.netns.clone(),
    }
}

fn serialize(result: &CniResult) -> Result<Vec<u8>, CniError> {
    result
        .to_bytes()
        .map_err(|e| CniError::new(ErrorCode::Unknown, format!("Failed to encode result: {}", e)))
}

#[cfg(test)]
mod tests;
