//! Decoding of the network configuration and runtime arguments of a request

use crate::cni::protocol::CniCmdArgs;
use crate::cni::result::Dns;
use crate::error::CniError;
use serde::Deserialize;

/// Network namespace prefix used by workload containers that join a sandbox.
const SHARED_NETNS_PREFIX: &str = "container:";

/// CNI versions accepted from the runtime.
pub const SUPPORTED_CNI_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0"];

pub fn is_cni_version_supported(version: &str) -> bool {
    SUPPORTED_CNI_VERSIONS.contains(&version)
}

/// DNS overrides supplied by the runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeDns {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub searches: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub dns: RuntimeDns,
}

/// Network configuration JSON handed over by the runtime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub dns: Dns,
    #[serde(default)]
    pub runtime_config: RuntimeConfig,
    #[serde(default)]
    pub prev_result: Option<serde_json::Value>,
}

impl NetworkConfig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// DNS settings for the result: runtime values win field by field.
    pub fn effective_dns(&self) -> Dns {
        let mut dns = self.dns.clone();
        if !self.runtime_config.dns.servers.is_empty() {
            dns.nameservers = self.runtime_config.dns.servers.clone();
        }
        if !self.runtime_config.dns.searches.is_empty() {
            dns.search = self.runtime_config.dns.searches.clone();
        }
        dns
    }
}

/// Orchestrator arguments carried in `CNI_ARGS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct K8sArgs {
    pub pod_name: String,
    pub pod_namespace: String,
    pub infra_container_id: String,
}

impl K8sArgs {
    /// Parses `KEY=VALUE;KEY=VALUE`. Unknown keys are rejected unless
    /// `IgnoreUnknown` is set.
    pub fn parse(args: &str) -> Result<Self, String> {
        let mut parsed = K8sArgs::default();
        if args.is_empty() {
            return Ok(parsed);
        }

        let mut pairs = Vec::new();
        for pair in args.split(';') {
            let kv: Vec<&str> = pair.split('=').collect();
            if kv.len() != 2 {
                return Err(format!("ARGS: invalid pair {:?}", pair));
            }
            pairs.push((kv[0], kv[1]));
        }

        let ignore_unknown = pairs.iter().any(|(k, v)| {
            *k == "IgnoreUnknown" && matches!(v.to_ascii_lowercase().as_str(), "1" | "true")
        });

        for (key, value) in pairs {
            match key {
                "K8S_POD_NAME" => parsed.pod_name = value.to_string(),
                "K8S_POD_NAMESPACE" => parsed.pod_namespace = value.to_string(),
                "K8S_POD_INFRA_CONTAINER_ID" => parsed.infra_container_id = value.to_string(),
                "IgnoreUnknown" => {}
                unknown if !ignore_unknown => {
                    return Err(format!("ARGS: unknown args {:?}", unknown));
                }
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// One decoded Add/Del/Check operation. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub container_id: String,
    /// Key used for arbitration: the sandbox owning the network namespace.
    pub infra_container_id: String,
    /// Whether this container owns its network namespace.
    pub is_infra: bool,
    /// Namespace path as seen from the agent.
    pub netns: String,
    pub ifname: String,
    pub cni_version: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub network: NetworkConfig,
    pub args: CniCmdArgs,
}

impl RequestContext {
    /// Decodes a request. The protocol version is not checked here.
    pub fn decode(args: &CniCmdArgs, host_proc_prefix: &str) -> Result<Self, CniError> {
        let network = NetworkConfig::from_bytes(&args.network_configuration)
            .map_err(|_| CniError::decoding_failure("network config"))?;
        let k8s_args =
            K8sArgs::parse(&args.args).map_err(|_| CniError::decoding_failure("runtime args"))?;

        let (infra_container_id, is_infra) = resolve_infra_container(&args.container_id, &args.netns);

        Ok(Self {
            container_id: args.container_id.clone(),
            infra_container_id,
            is_infra,
            netns: host_netns_path(host_proc_prefix, &args.netns),
            ifname: args.ifname.clone(),
            cni_version: network.cni_version.clone(),
            pod_name: k8s_args.pod_name,
            pod_namespace: k8s_args.pod_namespace,
            network,
            args: args.clone(),
        })
    }

    /// `namespace/name` of the pod owning this container.
    pub fn pod_key(&self) -> String {
        crate::store::namespaced_name(&self.pod_namespace, &self.pod_name)
    }
}

/// Returns the sandbox id and whether `container_id` is that sandbox.
fn resolve_infra_container(container_id: &str, netns: &str) -> (String, bool) {
    match netns.strip_prefix(SHARED_NETNS_PREFIX) {
        Some(sandbox) if !sandbox.trim().is_empty() && sandbox.trim() != container_id => {
            (sandbox.trim().to_string(), false)
        }
        _ => (container_id.to_string(), true),
    }
}

/// Prepends the host `/proc` mount point when the agent runs in a container.
fn host_netns_path(host_proc_prefix: &str, netns: &str) -> String {
    if netns.is_empty() || netns.starts_with(SHARED_NETNS_PREFIX) {
        return netns.to_string();
    }
    format!("{}{}", host_proc_prefix.trim_end_matches('/'), netns)
}
