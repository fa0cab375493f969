//! Unix socket front end of the CNI server

use crate::cni::protocol::{read_message, write_message};
use crate::cni::{CniCmdResponse, CniRequest, ErrorCode};
use crate::error::{AppError, ProtocolError};
use crate::server::CniServer;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

pub struct CniListener {
    socket_path: PathBuf,
    server: Arc<CniServer>,
}

impl CniListener {
    pub fn new(socket_path: impl Into<PathBuf>, server: Arc<CniServer>) -> Self {
        Self {
            socket_path: socket_path.into(),
            server,
        }
    }

    /// Binds the socket, replacing a stale one left by a previous run.
    pub fn bind(&self) -> Result<UnixListener, AppError> {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed stale socket {}", self.socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!("CNI server listening on {}", self.socket_path.display());
        Ok(listener)
    }

    /// Serves requests until `shutdown` completes. Each connection is handled
    /// on its own task; requests for different containers run in parallel.
    pub async fn serve(
        &self,
        listener: UnixListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), AppError> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("CNI server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let server = Arc::clone(&self.server);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, server).await {
                            warn!("Error serving CNI connection: {}", e);
                        }
                    });
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Failed to remove socket {}: {}", self.socket_path.display(), e);
        }
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, server: Arc<CniServer>) -> Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let response = match read_message::<CniRequest, _>(&mut reader).await {
        Ok(request) => server.handle(request).await,
        Err(ProtocolError::Closed) => return Ok(()),
        Err(ProtocolError::Serialization(e)) => {
            error!("Failed to decode request: {}", e);
            CniCmdResponse::error(ErrorCode::DecodingFailure, "Failed to decode request")
        }
        Err(e) => return Err(e),
    };

    write_message(&mut write_half, &response).await
}
