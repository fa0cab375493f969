//! Client side of the agent socket, used by the `ovs-cni` plugin shim.

use crate::cni::protocol::{read_message, write_message, CniCmdResponse, CniRequest};
use crate::error::ProtocolError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Default request timeout. Kubelet gives the runtime two minutes per call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(110);

/// Sends one request per connection to the agent.
#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn send(&self, request: &CniRequest) -> Result<CniCmdResponse, ProtocolError> {
        timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| ProtocolError::Timeout(self.timeout))?
    }

    async fn round_trip(&self, request: &CniRequest) -> Result<CniCmdResponse, ProtocolError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_message(&mut write_half, request).await?;
        let mut reader = BufReader::new(read_half);
        read_message(&mut reader).await
    }
}
