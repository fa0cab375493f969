//! Startup reconciliation
//!
//! Flow tables do not survive an agent restart, and pods may have been
//! deleted while the agent was down. Interfaces of pods that still exist get
//! their flows back; interfaces of pods that are gone are removed. Pods with
//! no interface yet are left to the runtime's next Add.

use crate::error::AppError;
use crate::server::{ContainerArbitrator, PodConfigurator};
use crate::store::{namespaced_name, PodLister};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one pass, by interface name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub replayed: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Reconciler {
    pods: Arc<dyn PodLister>,
    configurator: Arc<PodConfigurator>,
    arbitrator: Arc<ContainerArbitrator>,
}

impl Reconciler {
    pub fn new(
        pods: Arc<dyn PodLister>,
        configurator: Arc<PodConfigurator>,
        arbitrator: Arc<ContainerArbitrator>,
    ) -> Self {
        Self {
            pods,
            configurator,
            arbitrator,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let desired: HashSet<String> = self
            .pods
            .list_pods()
            .await?
            .into_iter()
            .filter(|pod| !pod.host_network)
            .map(|pod| namespaced_name(&pod.namespace, &pod.name))
            .collect();

        let mut report = ReconcileReport::default();
        for listed in self.configurator.store().list() {
            let _guard = self.arbitrator.lock(&listed.container_id).await;
            let name = listed.interface_name.clone();
            // A request may have removed or replaced the record before the lock
            let config = match self.configurator.store().get_interface(&name) {
                Some(current) if current == listed => current,
                _ => {
                    debug!("Interface {} changed during reconciliation, skipping", name);
                    continue;
                }
            };

            if desired.contains(&config.pod_key()) {
                match self.configurator.reconnect(&config).await {
                    Ok(()) => report.replayed.push(name),
                    Err(e) => {
                        error!("Failed to restore flows of {}: {}", name, e);
                        report.failed.push(name);
                    }
                }
            } else {
                warn!(
                    "Removing interface {} of deleted pod {}",
                    name,
                    config.pod_key()
                );
                match self.configurator.remove_interface(&config).await {
                    Ok(()) => report.removed.push(name),
                    Err(e) => {
                        error!("Failed to remove stale interface {}: {}", name, e);
                        report.failed.push(name);
                    }
                }
            }
        }

        info!(
            "Reconciliation done: {} restored, {} removed, {} failed",
            report.replayed.len(),
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
