//! In-process simnet for tests and tools.
//!
//! Starts a control server over a [`SimNode`] on a private socket, serves it on
//! a background task and hands back a connected client.

use crate::config::{ControlConfig, LogLevel, ServerConfig};
use crate::error::{Result, SimError};
use crate::ipc::{ControlClient, ControlServer};
use crate::node::SimNode;
use crate::ports::PortAllocator;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running control server plus a client connected to it.
pub struct LocalSim {
    server: Arc<ControlServer<SimNode>>,
    serve_task: Option<JoinHandle<Result<()>>>,
    client: ControlClient,
    _socket_dir: TempDir,
}

impl LocalSim {
    /// Start a server on a fresh socket and wait until it accepts connections.
    pub async fn start(ports: &PortAllocator, log_level: LogLevel) -> Result<Self> {
        let socket_dir = tempfile::Builder::new().prefix("simd-").tempdir()?;
        let socket_path = socket_dir.path().join("simd.sock");

        let config = ServerConfig::new(&socket_path).with_log_level(log_level);
        let server = Arc::new(ControlServer::bind(&config, ports, SimNode::default()).await?);

        let serve_task = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let client = match ControlClient::dial_until_ready(
            &socket_path,
            ControlConfig::DIAL_RETRY_INTERVAL,
            ControlConfig::DIAL_READY_TIMEOUT,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                if let Err(close_err) = server.close().await {
                    warn!("Failed to close server after dial error: {}", close_err);
                }
                return Err(e);
            }
        };
        client.ping().await?;

        debug!("Local simnet ready at {}", socket_path.display());

        Ok(Self {
            server,
            serve_task: Some(serve_task),
            client,
            _socket_dir: socket_dir,
        })
    }

    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    pub fn server(&self) -> &ControlServer<SimNode> {
        &self.server
    }

    pub fn socket_path(&self) -> &Path {
        self.server.socket_path()
    }

    /// Open another connection to the same server.
    pub async fn connect(&self) -> Result<ControlClient> {
        ControlClient::dial(self.socket_path()).await
    }

    /// Stop the server through the control socket and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.client.stop().await?;

        if let Some(task) = self.serve_task.take() {
            task.await
                .map_err(|e| SimError::Other(format!("serve task failed: {}", e)))??;
        }

        self.server.close().await
    }
}

impl Drop for LocalSim {
    fn drop(&mut self) {
        if let Some(task) = self.serve_task.take() {
            self.server.stop_token().cancel();
            task.abort();
        }
    }
}
