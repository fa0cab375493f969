//! TOML configuration file parsing

use crate::config::{parse_duration, parse_optional_duration, AgentConfig};
use crate::error::ConfigError;
use serde::Deserialize;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub server: Option<ServerSection>,
    pub switch: Option<SwitchSection>,
    pub logging: Option<LoggingConfig>,
}

/// Socket, descriptor and request handling settings
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub socket: Option<String>,
    pub host_proc_path_prefix: Option<String>,
    pub descriptor_dir: Option<String>,
    pub network_ready_timeout: Option<String>,
    pub lock_timeout: Option<String>,
}

/// Open vSwitch settings
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchSection {
    pub bridge: Option<String>,
    pub ofport_wait: Option<String>,
    pub command_timeout: Option<String>,
}

/// Logging configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl TomlConfig {
    /// Apply file values over base configuration
    pub fn apply_to_config(self, mut config: AgentConfig) -> Result<AgentConfig, ConfigError> {
        if let Some(server) = self.server {
            if let Some(socket) = server.socket {
                config.cni_socket = socket;
            }
            if let Some(prefix) = server.host_proc_path_prefix {
                config.host_proc_path_prefix = prefix;
            }
            if let Some(dir) = server.descriptor_dir {
                config.descriptor_dir = dir;
            }
            if let Some(ref timeout) = server.network_ready_timeout {
                config.network_ready_timeout = parse_duration(timeout)?;
            }
            if let Some(ref timeout) = server.lock_timeout {
                config.lock_timeout = parse_optional_duration(timeout)?;
            }
        }

        if let Some(switch) = self.switch {
            if let Some(bridge) = switch.bridge {
                config.ovs_bridge = bridge;
            }
            if let Some(ref wait) = switch.ofport_wait {
                config.ofport_wait = parse_duration(wait)?;
            }
            if let Some(ref timeout) = switch.command_timeout {
                config.ovs_command_timeout = parse_duration(timeout)?;
            }
        }

        if let Some(logging) = self.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
            if let Some(ref format) = logging.format {
                config.log_format = format.parse()?;
            }
        }

        Ok(config)
    }
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    parse_toml_config(&content)
}

pub fn parse_toml_config(content: &str) -> Result<TomlConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}
