//! Command-line argument parsing

use crate::config::{format_duration, parse_duration, parse_optional_duration, AgentConfig};
use crate::error::ConfigError;
use clap::Parser;

/// Command-line arguments structure
#[derive(Parser, Debug, Default)]
#[command(name = "ovs-cni-agent")]
#[command(about = "Node agent attaching container interfaces to an Open vSwitch bridge")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, help = "Set the logging level")]
    pub log_level: Option<String>,

    #[arg(long, help = "Log output format: text or json")]
    pub log_format: Option<String>,

    #[arg(long, help = "Path of the Unix socket serving CNI requests")]
    pub cni_socket: Option<String>,

    #[arg(long, help = "Open vSwitch bridge that container ports are added to")]
    pub ovs_bridge: Option<String>,

    #[arg(
        long,
        help = "Prefix for network namespace paths when running inside a container"
    )]
    pub host_proc_path_prefix: Option<String>,

    #[arg(long, help = "Directory holding per-pod interface descriptors")]
    pub descriptor_dir: Option<String>,

    #[arg(long, help = "How long Add waits for the node network (e.g. 30s)")]
    pub network_ready_timeout: Option<String>,

    #[arg(
        long,
        help = "How long a request waits for a busy container, 'none' to wait forever"
    )]
    pub lock_timeout: Option<String>,

    #[arg(long, help = "How long to wait for a new port's OpenFlow number (e.g. 1s)")]
    pub ofport_wait: Option<String>,

    #[arg(long, help = "Timeout for each ovs-vsctl and ovs-ofctl invocation")]
    pub ovs_command_timeout: Option<String>,

    /// Validate configuration and exit
    #[arg(
        long,
        help = "Validate configuration and exit without starting the service"
    )]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: AgentConfig) -> Result<AgentConfig, ConfigError> {
        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(ref format) = self.log_format {
            base_config.log_format = format.parse()?;
        }

        if let Some(ref socket) = self.cni_socket {
            base_config.cni_socket = socket.clone();
        }

        if let Some(ref bridge) = self.ovs_bridge {
            base_config.ovs_bridge = bridge.clone();
        }

        if let Some(ref prefix) = self.host_proc_path_prefix {
            base_config.host_proc_path_prefix = prefix.clone();
        }

        if let Some(ref dir) = self.descriptor_dir {
            base_config.descriptor_dir = dir.clone();
        }

        if let Some(ref timeout) = self.network_ready_timeout {
            base_config.network_ready_timeout = parse_duration(timeout)?;
        }

        if let Some(ref timeout) = self.lock_timeout {
            base_config.lock_timeout = parse_optional_duration(timeout)?;
        }

        if let Some(ref wait) = self.ofport_wait {
            base_config.ofport_wait = parse_duration(wait)?;
        }

        if let Some(ref timeout) = self.ovs_command_timeout {
            base_config.ovs_command_timeout = parse_duration(timeout)?;
        }

        Ok(base_config)
    }
}

/// Default configuration in TOML format
pub fn default_config_toml() -> String {
    let config = AgentConfig::default();
    let lock_timeout = config
        .lock_timeout
        .map(format_duration)
        .unwrap_or_else(|| "none".to_string());

    let lines = [
        "# OVS CNI Agent Configuration".to_string(),
        "# This is the default configuration with all available options".to_string(),
        String::new(),
        "[server]".to_string(),
        "# Unix socket the CNI plugin connects to".to_string(),
        format!("socket = \"{}\"", config.cni_socket),
        "# Prefix for namespace paths when the agent runs in a container".to_string(),
        format!("host_proc_path_prefix = \"{}\"", config.host_proc_path_prefix),
        "# Directory of per-pod interface descriptors (<namespace>/<name>.json)".to_string(),
        format!("descriptor_dir = \"{}\"", config.descriptor_dir),
        "# How long Add waits for the node network before asking the runtime to retry".to_string(),
        format!(
            "network_ready_timeout = \"{}\"",
            format_duration(config.network_ready_timeout)
        ),
        "# How long a request waits for a busy container; \"none\" waits forever".to_string(),
        format!("lock_timeout = \"{}\"", lock_timeout),
        String::new(),
        "[switch]".to_string(),
        "# Bridge that container ports are added to".to_string(),
        format!("bridge = \"{}\"", config.ovs_bridge),
        "# How long to wait for a new port's OpenFlow number".to_string(),
        format!("ofport_wait = \"{}\"", format_duration(config.ofport_wait)),
        "# Timeout for each ovs-vsctl and ovs-ofctl invocation".to_string(),
        format!(
            "command_timeout = \"{}\"",
            format_duration(config.ovs_command_timeout)
        ),
        String::new(),
        "[logging]".to_string(),
        "# Log level: trace, debug, info, warn, error".to_string(),
        format!("level = \"{}\"", config.log_level),
        "# Log format: text or json".to_string(),
        format!("format = \"{}\"", config.log_format),
    ];
    lines.join("\n") + "\n"
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    print!("{}", default_config_toml());
}
