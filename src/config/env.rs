//! Environment variable configuration handling

use crate::config::{parse_duration, parse_optional_duration, AgentConfig};
use crate::error::ConfigError;
use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "OVS_CNI_AGENT_";

fn var(name: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(mut base_config: AgentConfig) -> Result<AgentConfig, ConfigError> {
    if let Some(socket) = var("CNI_SOCKET") {
        base_config.cni_socket = socket;
    }

    if let Some(bridge) = var("OVS_BRIDGE") {
        base_config.ovs_bridge = bridge;
    }

    if let Some(prefix) = var("HOST_PROC_PATH_PREFIX") {
        base_config.host_proc_path_prefix = prefix;
    }

    if let Some(dir) = var("DESCRIPTOR_DIR") {
        base_config.descriptor_dir = dir;
    }

    if let Some(timeout) = var("NETWORK_READY_TIMEOUT") {
        base_config.network_ready_timeout = parse_duration(&timeout)?;
    }

    // "none" or "0" disables the limit
    if let Some(timeout) = var("LOCK_TIMEOUT") {
        base_config.lock_timeout = parse_optional_duration(&timeout)?;
    }

    if let Some(wait) = var("OFPORT_WAIT") {
        base_config.ofport_wait = parse_duration(&wait)?;
    }

    if let Some(timeout) = var("OVS_COMMAND_TIMEOUT") {
        base_config.ovs_command_timeout = parse_duration(&timeout)?;
    }

    if let Some(level) = var("LOG_LEVEL") {
        base_config.log_level = level;
    }

    if let Some(format) = var("LOG_FORMAT") {
        base_config.log_format = format.parse()?;
    }

    Ok(base_config)
}
