//! Externally supplied interface descriptors
//!
//! A provisioning controller resolves each pod's virtual interfaces (MAC,
//! addresses, network) and publishes them as one JSON document per pod. The
//! agent only reads them.

use crate::error::DescriptorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed IP assigned on a subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    #[serde(default)]
    pub subnet_id: String,
    pub ip_address: String,
}

/// Static route carried by a subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRoute {
    pub cidr: String,
    pub gateway: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifSubnet {
    pub cidr: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub ip_version: u8,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub ips: Vec<FixedIp>,
    #[serde(default)]
    pub routes: Vec<SubnetRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifNetwork {
    #[serde(default)]
    pub id: String,
    /// 0 leaves the kernel default in place
    #[serde(default)]
    pub mtu: u32,
    #[serde(default)]
    pub subnets: Vec<VifSubnet>,
}

/// Virtual interface record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vif {
    /// Unique port identifier, also used to name the host-side interface
    pub id: String,
    pub mac_address: String,
    #[serde(default)]
    pub bridge_name: String,
    pub network: VifNetwork,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifEntry {
    pub if_name: String,
    #[serde(rename = "default", default)]
    pub is_default: bool,
    pub vif: Vif,
}

/// Per-pod descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    #[serde(default)]
    pub vifs: Vec<VifEntry>,
    #[serde(default)]
    pub host_network: bool,
}

impl InterfaceDescriptor {
    /// VIF entries attached to the container interface `ifname`.
    pub fn matching_vifs<'a>(&'a self, ifname: &'a str) -> impl Iterator<Item = &'a VifEntry> + 'a {
        self.vifs.iter().filter(move |entry| entry.if_name == ifname)
    }
}

/// A pod known to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub host_network: bool,
}

/// Lookup of resolved descriptors by pod
#[async_trait]
pub trait DescriptorLister: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<InterfaceDescriptor, DescriptorError>;
}

/// Listing of the pods scheduled on this node
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<PodRef>, DescriptorError>;
}

/// Descriptor store backed by `<root>/<namespace>/<name>.json`
#[derive(Debug, Clone)]
pub struct FileDescriptorStore {
    root: PathBuf,
}

impl FileDescriptorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Both parts must be single path components so lookups stay under
    /// the root.
    fn descriptor_path(&self, namespace: &str, name: &str) -> Result<PathBuf, DescriptorError> {
        let valid = |part: &str| {
            !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\0'])
        };
        if !valid(namespace) || !valid(name) {
            return Err(DescriptorError::InvalidPodName {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        Ok(self.root.join(namespace).join(format!("{}.json", name)))
    }

    async fn read(&self, path: &Path) -> Result<InterfaceDescriptor, std::io::Error> {
        let content = tokio::fs::read(path).await?;
        serde_json::from_slice(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[async_trait]
impl DescriptorLister for FileDescriptorStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<InterfaceDescriptor, DescriptorError> {
        let path = self.descriptor_path(namespace, name)?;
        debug!("Reading interface descriptor {}", path.display());
        match self.read(&path).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DescriptorError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(DescriptorError::Malformed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(DescriptorError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

#[async_trait]
impl PodLister for FileDescriptorStore {
    async fn list_pods(&self) -> Result<Vec<PodRef>, DescriptorError> {
        let io_err = |path: &Path, source| DescriptorError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut pods = Vec::new();
        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pods),
            Err(e) => return Err(io_err(&self.root, e)),
        };

        while let Some(ns_entry) = namespaces
            .next_entry()
            .await
            .map_err(|e| io_err(&self.root, e))?
        {
            let ns_path = ns_entry.path();
            if !ns_path.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(&ns_path)
                .await
                .map_err(|e| io_err(&ns_path, e))?;

            while let Some(file) = files.next_entry().await.map_err(|e| io_err(&ns_path, e))? {
                let path = file.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                // An unreadable descriptor still names a pod that exists
                let host_network = match self.read(&path).await {
                    Ok(descriptor) => descriptor.host_network,
                    Err(e) => {
                        warn!("Failed to read descriptor {}: {}", path.display(), e);
                        false
                    }
                };
                pods.push(PodRef {
                    namespace: namespace.clone(),
                    name,
                    host_network,
                });
            }
        }

        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(pods)
    }
}
