//! Centralized error types and handling

use crate::cni::ErrorCode;
use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Interface operation error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("Switch operation error: {0}")]
    Switch(#[from] SwitchError),

    #[error("Interface descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or tearing down container interfaces
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("Failed to access network namespace {path}: {reason}")]
    NamespaceAccess { path: String, reason: String },

    #[error("Link {name} not found")]
    LinkNotFound { name: String },

    #[error("Failed to create link {name}: {reason}")]
    LinkCreate { name: String, reason: String },

    #[error("Failed to configure link {name}: {reason}")]
    LinkConfigure { name: String, reason: String },

    #[error("Failed to delete link {name}: {reason}")]
    LinkDelete { name: String, reason: String },

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Route programming failed: {0}")]
    Route(#[from] RouteError),

    #[error("Interface check failed: {0}")]
    Check(String),
}

/// Route calculation and programming errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Failed to add route: {0}")]
    AddRoute(String),

    #[error("Failed to add address: {0}")]
    AddAddress(String),

    #[error("Invalid route configuration: {0}")]
    InvalidRoute(String),
}

/// Errors talking to the virtual switch (ports and flows)
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("OpenFlow port of {port} not available")]
    OfPortUnavailable { port: String },

    #[error("Unexpected switch output: {0}")]
    InvalidOutput(String),

    #[error("Failed to install flows for {port}: {reason}")]
    InstallFlows { port: String, reason: String },

    #[error("Failed to uninstall flows for {port}: {reason}")]
    UninstallFlows { port: String, reason: String },

    /// Attaching failed and the port could not be removed again
    #[error("{source} (port {port} left on the bridge: {cleanup})")]
    PortLeftAttached {
        port: String,
        port_uuid: String,
        ofport: Option<u32>,
        source: Box<SwitchError>,
        cleanup: Box<SwitchError>,
    },
}

/// Errors resolving externally supplied interface descriptors
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Interface descriptor for pod {namespace}/{name} not resolved yet")]
    NotFound { namespace: String, name: String },

    #[error("Failed to read descriptor {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed descriptor {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Invalid pod name {namespace:?}/{name:?}")]
    InvalidPodName { namespace: String, name: String },

    #[error("No interface named {ifname} in descriptor for pod {namespace}/{name}")]
    NoMatchingVif {
        namespace: String,
        name: String,
        ifname: String,
    },
}

/// Wire protocol errors on the local socket
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed before a complete message was received")]
    Closed,

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Terminal error returned to the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct CniError {
    pub code: ErrorCode,
    pub message: String,
}

impl CniError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn decoding_failure(what: &str) -> Self {
        Self::new(ErrorCode::DecodingFailure, format!("Failed to decode {}", what))
    }

    pub fn try_again_later() -> Self {
        Self::new(ErrorCode::TryAgainLater, "Server is busy, please retry later")
    }

    pub fn config_interface_failure(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::ConfigInterfaceFailure, err.to_string())
    }

    pub fn check_interface_failure(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::CheckInterfaceFailure, err.to_string())
    }
}

impl From<DescriptorError> for CniError {
    fn from(err: DescriptorError) -> Self {
        let code = match err {
            DescriptorError::NotFound { .. } => ErrorCode::TryAgainLater,
            DescriptorError::Io { .. } => ErrorCode::IoFailure,
            DescriptorError::Malformed { .. }
            | DescriptorError::InvalidPodName { .. }
            | DescriptorError::NoMatchingVif { .. } => {
                ErrorCode::InvalidNetworkConfig
            }
        };
        Self::new(code, err.to_string())
    }
}
