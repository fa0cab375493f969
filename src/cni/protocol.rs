//! Wire protocol between the CNI plugin shim and the agent.
//!
//! # Protocol Format
//!
//! - **Transport**: Unix domain stream socket, one request per connection
//! - **Encoding**: JSON
//! - **Framing**: Newline-delimited (each message ends with `\n`)
//!
//! ```text
//! ovs-cni (runtime side)               ovs-cni-agent
//!   |                                     |
//!   |  {"command":"add","cni_args":..}\n  |
//!   |------------------------------------>|
//!   |                                     |
//!   |  {"cni_result":"{...}"}\n           |
//!   |<------------------------------------|
//! ```
//!
//! Error code values are shared with the runtime and must never be renumbered.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted size of a single framed message.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Error codes returned to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    Unknown = 0,
    IncompatibleCniVersion = 1,
    UnsupportedField = 2,
    UnknownContainer = 3,
    InvalidEnvironmentVariables = 4,
    IoFailure = 5,
    DecodingFailure = 6,
    InvalidNetworkConfig = 7,
    TryAgainLater = 11,
    IpamFailure = 101,
    ConfigInterfaceFailure = 102,
    CheckInterfaceFailure = 103,
    UnknownRpcError = 201,
    IncompatibleApiVersion = 202,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => ErrorCode::Unknown,
            1 => ErrorCode::IncompatibleCniVersion,
            2 => ErrorCode::UnsupportedField,
            3 => ErrorCode::UnknownContainer,
            4 => ErrorCode::InvalidEnvironmentVariables,
            5 => ErrorCode::IoFailure,
            6 => ErrorCode::DecodingFailure,
            7 => ErrorCode::InvalidNetworkConfig,
            11 => ErrorCode::TryAgainLater,
            101 => ErrorCode::IpamFailure,
            102 => ErrorCode::ConfigInterfaceFailure,
            103 => ErrorCode::CheckInterfaceFailure,
            201 => ErrorCode::UnknownRpcError,
            202 => ErrorCode::IncompatibleApiVersion,
            other => return Err(format!("unknown error code {}", other)),
        };
        Ok(code)
    }
}

/// Arguments the runtime passes to the plugin, forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CniCmdArgs {
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    /// `;`-separated `KEY=VALUE` pairs (pod name/namespace and friends).
    pub args: String,
    pub path: String,
    /// Raw network configuration JSON.
    #[serde(with = "utf8_bytes")]
    pub network_configuration: Vec<u8>,
}

/// Body shared by all three commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniCmdRequest {
    pub cni_args: CniCmdArgs,
}

/// Request from the plugin shim, tagged by command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CniRequest {
    Add(CniCmdRequest),
    Del(CniCmdRequest),
    Check(CniCmdRequest),
}

/// Discriminant of a [`CniRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Check,
}

impl std::fmt::Display for CniCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CniCommand::Add => "ADD",
            CniCommand::Del => "DEL",
            CniCommand::Check => "CHECK",
        };
        f.write_str(name)
    }
}

impl CniRequest {
    pub fn new(command: CniCommand, cni_args: CniCmdArgs) -> Self {
        let body = CniCmdRequest { cni_args };
        match command {
            CniCommand::Add => CniRequest::Add(body),
            CniCommand::Del => CniRequest::Del(body),
            CniCommand::Check => CniRequest::Check(body),
        }
    }

    pub fn command(&self) -> CniCommand {
        match self {
            CniRequest::Add(_) => CniCommand::Add,
            CniRequest::Del(_) => CniCommand::Del,
            CniRequest::Check(_) => CniCommand::Check,
        }
    }

    pub fn cni_args(&self) -> &CniCmdArgs {
        match self {
            CniRequest::Add(req) | CniRequest::Del(req) | CniRequest::Check(req) => &req.cni_args,
        }
    }
}

/// Structured error returned to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Terminal response to a [`CniRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniCmdResponse {
    /// Serialized CNI result; empty for Del and Check.
    #[serde(default, with = "utf8_bytes", skip_serializing_if = "Vec::is_empty")]
    pub cni_result: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl CniCmdResponse {
    pub fn success(cni_result: Vec<u8>) -> Self {
        Self {
            cni_result,
            error: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            cni_result: Vec::new(),
            error: Some(ErrorPayload {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl From<crate::error::CniError> for CniCmdResponse {
    fn from(err: crate::error::CniError) -> Self {
        CniCmdResponse::error(err.code, err.message)
    }
}

/// Writes one message followed by a newline.
pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one newline-terminated message.
pub async fn read_message<T, R>(reader: &mut R) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(ProtocolError::Closed);
    }
    if line.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message exceeds {} bytes", MAX_MESSAGE_LEN),
        )));
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Carries byte payloads that are always JSON text as plain strings.
mod utf8_bytes {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => serializer.serialize_str(text),
            Err(e) => Err(S::Error::custom(format!("payload is not UTF-8: {}", e))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)
            .map_err(|e| D::Error::custom(format!("expected a string payload: {}", e)))?;
        Ok(text.map(String::into_bytes).unwrap_or_default())
    }
}
