//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > TOML files > defaults

use crate::error::ConfigError;
use crate::server::ServerOptions;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod cli;
pub mod env;
pub mod toml;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidFormat(format!(
                "Invalid log format '{}'. Expected 'text' or 'json'",
                other
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub cni_socket: String,
    pub ovs_bridge: String,
    pub host_proc_path_prefix: String,
    pub descriptor_dir: String,
    pub network_ready_timeout: Duration,
    /// `None` lets requests wait for a busy container indefinitely
    pub lock_timeout: Option<Duration>,
    pub ofport_wait: Duration,
    pub ovs_command_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cni_socket: "/var/run/ovs-cni/cni.sock".to_string(),
            ovs_bridge: "br-int".to_string(),
            host_proc_path_prefix: String::new(),
            descriptor_dir: "/var/lib/ovs-cni/ports".to_string(),
            network_ready_timeout: Duration::from_secs(30),
            lock_timeout: None,
            ofport_wait: Duration::from_secs(1),
            ovs_command_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl AgentConfig {
    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cni_socket.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cni_socket".to_string(),
            });
        }
        if self.ovs_bridge.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ovs_bridge".to_string(),
            });
        }
        if self.descriptor_dir.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "descriptor_dir".to_string(),
            });
        }
        if self.ofport_wait.is_zero() {
            return Err(ConfigError::ValidationError(
                "ofport_wait must be greater than zero".to_string(),
            ));
        }
        if self.ovs_command_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "ovs_command_timeout must be greater than zero".to_string(),
            ));
        }
        if !self.host_proc_path_prefix.is_empty() && !self.host_proc_path_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "host_proc_path_prefix '{}' must be an absolute path",
                self.host_proc_path_prefix
            )));
        }
        Ok(())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host_proc_path_prefix: self.host_proc_path_prefix.clone(),
            network_ready_timeout: self.network_ready_timeout,
            lock_timeout: self.lock_timeout,
        }
    }
}

/// Loads the configuration from every layer.
pub fn load_config(cli: &cli::CliArgs) -> Result<AgentConfig, ConfigError> {
    let mut config = AgentConfig::default();
    if let Some(ref path) = cli.config {
        config = toml::load_toml_config(path)?.apply_to_config(config)?;
    }
    config = env::apply_env_config(config)?;
    config = cli.apply_to_config(config)?;
    config.validate()?;
    Ok(config)
}

/// Parses a duration such as `500ms`, `30s` or `2m`. A bare number is
/// taken as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || {
        ConfigError::InvalidFormat(format!(
            "Invalid duration '{}'. Expected e.g. '500ms', '30s' or '2m'",
            value
        ))
    };

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let amount: u64 = number.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        _ => Err(invalid()),
    }
}

/// Like [`parse_duration`], with `none` or zero meaning no limit.
pub fn parse_optional_duration(value: &str) -> Result<Option<Duration>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let duration = parse_duration(value)?;
    Ok((!duration.is_zero()).then_some(duration))
}

pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() != 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}s", duration.as_secs())
    }
}
