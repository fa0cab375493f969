//! In-memory collaborators for unit tests. Each records its calls in a
//! shared [`CallLog`] so tests can assert on ordering across collaborators.

use crate::error::{DescriptorError, InterfaceError, SwitchError};
use crate::network::{BuiltPair, InterfaceBuilder, InterfaceRef, PairSpec};
use crate::store::descriptor::{
    DescriptorLister, FixedIp, InterfaceDescriptor, PodLister, PodRef, Vif, VifEntry, VifNetwork,
    VifSubnet,
};
use crate::switch::{BridgeClient, FlowClient, PortData};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn position(&self, call: &str) -> usize {
        self.0
            .lock()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{} was never called", call))
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct FakePort {
    uuid: String,
    ofport: u32,
    external_ids: BTreeMap<String, String>,
}

pub struct FakeBridge {
    log: CallLog,
    ports: Mutex<BTreeMap<String, FakePort>>,
    next_ofport: AtomicU32,
    fail_create: AtomicBool,
    fail_ofport: AtomicBool,
    fail_delete: AtomicBool,
}

impl FakeBridge {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ports: Mutex::new(BTreeMap::new()),
            next_ofport: AtomicU32::new(10),
            fail_create: AtomicBool::new(false),
            fail_ofport: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_ofport(&self) {
        self.fail_ofport.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn insert_port(&self, port: PortData) {
        self.ports.lock().insert(
            port.name.clone(),
            FakePort {
                uuid: port.uuid,
                ofport: port.ofport.unwrap_or(0),
                external_ids: port.external_ids,
            },
        );
    }

    pub fn ofport_of(&self, name: &str) -> Option<u32> {
        self.ports.lock().get(name).map(|p| p.ofport)
    }

    pub fn external_ids_of(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.ports.lock().get(name).map(|p| p.external_ids.clone())
    }

    pub fn port_names(&self) -> Vec<String> {
        self.ports.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl BridgeClient for FakeBridge {
    async fn create_port(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
    ) -> Result<String, SwitchError> {
        self.log.record(format!("create_port {}", name));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SwitchError::Command {
                command: "create_port".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        let ofport = self.next_ofport.fetch_add(1, Ordering::SeqCst);
        let uuid = format!("uuid-{}", name);
        self.ports.lock().insert(
            name.to_string(),
            FakePort {
                uuid: uuid.clone(),
                ofport,
                external_ids: external_ids.clone(),
            },
        );
        Ok(uuid)
    }

    async fn delete_port(&self, port_uuid: &str) -> Result<(), SwitchError> {
        let mut ports = self.ports.lock();
        let name = ports
            .iter()
            .find(|(_, port)| port.uuid == port_uuid)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| port_uuid.to_string());
        self.log.record(format!("delete_port {}", name));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SwitchError::Command {
                command: "delete_port".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        ports.remove(&name);
        Ok(())
    }

    async fn get_ofport(&self, name: &str) -> Result<u32, SwitchError> {
        self.log.record(format!("get_ofport {}", name));
        match self.ports.lock().get(name) {
            Some(port) if !self.fail_ofport.load(Ordering::SeqCst) => Ok(port.ofport),
            _ => Err(SwitchError::OfPortUnavailable {
                port: name.to_string(),
            }),
        }
    }

    async fn list_ports(&self) -> Result<Vec<PortData>, SwitchError> {
        Ok(self
            .ports
            .lock()
            .iter()
            .map(|(name, port)| PortData {
                uuid: port.uuid.clone(),
                name: name.clone(),
                ofport: Some(port.ofport),
                external_ids: port.external_ids.clone(),
            })
            .collect())
    }
}

pub struct FakeFlows {
    log: CallLog,
    installed: Mutex<BTreeMap<String, u32>>,
    fail_install: AtomicBool,
    fail_uninstall: AtomicBool,
}

impl FakeFlows {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            installed: Mutex::new(BTreeMap::new()),
            fail_install: AtomicBool::new(false),
            fail_uninstall: AtomicBool::new(false),
        }
    }

    pub fn fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uninstall(&self, fail: bool) {
        self.fail_uninstall.store(fail, Ordering::SeqCst);
    }

    pub fn installed(&self) -> BTreeMap<String, u32> {
        self.installed.lock().clone()
    }
}

#[async_trait]
impl FlowClient for FakeFlows {
    async fn install_pod_flows(
        &self,
        name: &str,
        _ips: &[IpAddr],
        _mac: &str,
        ofport: u32,
    ) -> Result<(), SwitchError> {
        self.log.record(format!("install_flows {}", name));
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(SwitchError::InstallFlows {
                port: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.installed.lock().insert(name.to_string(), ofport);
        Ok(())
    }

    async fn uninstall_pod_flows(&self, name: &str) -> Result<(), SwitchError> {
        self.log.record(format!("uninstall_flows {}", name));
        if self.fail_uninstall.load(Ordering::SeqCst) {
            return Err(SwitchError::UninstallFlows {
                port: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.installed.lock().remove(name);
        Ok(())
    }
}

/// Builder tracking existing pairs and the number of builds running at once
pub struct FakeBuilder {
    log: CallLog,
    pairs: Mutex<BTreeSet<String>>,
    fail_build: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    build_delay: Mutex<Option<Duration>>,
}

impl FakeBuilder {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            pairs: Mutex::new(BTreeSet::new()),
            fail_build: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            build_delay: Mutex::new(None),
        }
    }

    pub fn fail_build(&self) {
        self.fail_build.store(true, Ordering::SeqCst);
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock() = Some(delay);
    }

    pub fn pairs(&self) -> Vec<String> {
        self.pairs.lock().iter().cloned().collect()
    }

    pub fn insert_pair(&self, host_ifname: &str) {
        self.pairs.lock().insert(host_ifname.to_string());
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterfaceBuilder for FakeBuilder {
    async fn build_pair(&self, spec: &PairSpec) -> Result<BuiltPair, InterfaceError> {
        self.log.record(format!("build_pair {}", spec.host_ifname));
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let delay = *self.build_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail_build.load(Ordering::SeqCst) {
            return Err(InterfaceError::LinkCreate {
                name: spec.host_ifname.clone(),
                reason: "injected failure".to_string(),
            });
        }
        self.pairs.lock().insert(spec.host_ifname.clone());
        Ok(BuiltPair {
            host: InterfaceRef {
                name: spec.host_ifname.clone(),
                mac: "02:00:00:00:00:01".to_string(),
                sandbox: String::new(),
            },
            container: InterfaceRef {
                name: spec.container_ifname.clone(),
                mac: spec.mac.clone(),
                sandbox: spec.netns.clone(),
            },
        })
    }

    async fn teardown(&self, _container_id: &str, host_ifname: &str) -> Result<(), InterfaceError> {
        self.log.record(format!("teardown {}", host_ifname));
        self.pairs.lock().remove(host_ifname);
        Ok(())
    }

    async fn check_pair(
        &self,
        host_ifname: &str,
        _netns: &str,
        container_ifname: &str,
        _mac: &str,
    ) -> Result<(), InterfaceError> {
        self.log.record(format!("check_pair {}", host_ifname));
        if self.pairs.lock().contains(host_ifname) {
            Ok(())
        } else {
            Err(InterfaceError::LinkNotFound {
                name: container_ifname.to_string(),
            })
        }
    }
}

#[derive(Default)]
pub struct FakeDescriptors {
    descriptors: Mutex<HashMap<(String, String), InterfaceDescriptor>>,
}

impl FakeDescriptors {
    pub fn insert(&self, namespace: &str, name: &str, descriptor: InterfaceDescriptor) {
        self.descriptors
            .lock()
            .insert((namespace.to_string(), name.to_string()), descriptor);
    }
}

#[async_trait]
impl DescriptorLister for FakeDescriptors {
    async fn get(&self, namespace: &str, name: &str) -> Result<InterfaceDescriptor, DescriptorError> {
        self.descriptors
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| DescriptorError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl PodLister for FakeDescriptors {
    async fn list_pods(&self) -> Result<Vec<PodRef>, DescriptorError> {
        let mut pods: Vec<PodRef> = self
            .descriptors
            .lock()
            .iter()
            .map(|((namespace, name), descriptor)| PodRef {
                namespace: namespace.clone(),
                name: name.clone(),
                host_network: descriptor.host_network,
            })
            .collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(pods)
    }
}

/// Single-VIF descriptor on an IPv4 subnet
pub fn single_vif_descriptor(
    if_name: &str,
    vif_id: &str,
    mac: &str,
    cidr: &str,
    ip: &str,
    gateway: &str,
) -> InterfaceDescriptor {
    InterfaceDescriptor {
        vifs: vec![VifEntry {
            if_name: if_name.to_string(),
            is_default: true,
            vif: Vif {
                id: vif_id.to_string(),
                mac_address: mac.to_string(),
                bridge_name: "br-int".to_string(),
                network: VifNetwork {
                    id: "net-1".to_string(),
                    mtu: 1450,
                    subnets: vec![VifSubnet {
                        cidr: cidr.to_string(),
                        gateway: gateway.to_string(),
                        ip_version: 4,
                        dns: vec![],
                        ips: vec![FixedIp {
                            subnet_id: "subnet-1".to_string(),
                            ip_address: ip.to_string(),
                        }],
                        routes: vec![],
                    }],
                },
            },
        }],
        host_network: false,
    }
}
