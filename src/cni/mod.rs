//! CNI protocol module
//!
//! Wire types exchanged with the plugin shim, decoding of requests, and the
//! result model returned to the container runtime.

pub mod client;
pub mod config;
pub mod protocol;
pub mod result;

pub use config::{is_cni_version_supported, RequestContext, SUPPORTED_CNI_VERSIONS};
pub use protocol::{CniCmdArgs, CniCmdResponse, CniCommand, CniRequest, ErrorCode, ErrorPayload};
pub use result::CniResult;
