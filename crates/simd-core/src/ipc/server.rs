//! Control server on a Unix domain socket.
//!
//! Construction starts the backing node and binds the socket. `serve()` runs
//! the accept loop until stop is requested or the listener fails; each
//! accepted connection is handled on its own task.
//!
//! # Shutdown
//!
//! A `Stop` request (or `close()`) cancels the server's stop token. The accept
//! loop then drops the listener and unlinks the socket path. Connection
//! handlers finish the exchange in progress and close their connection the
//! next time they would wait for a request.

use super::handler::Handler;
use super::protocol::{read_frame, write_frame, IpcRequest, IpcResponse};
use crate::cancel::CancellationToken;
use crate::config::{LogLevel, ServerConfig};
use crate::error::{Result, SimError};
use crate::logwatch::LogWatcher;
use crate::node::{NodeOptions, ProcessController};
use crate::ports::PortAllocator;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Trait for dispatching IPC method calls.
#[async_trait::async_trait]
pub trait IpcDispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// A bound control server and the backing node it owns.
pub struct ControlServer<C: ProcessController> {
    socket_path: PathBuf,
    handler: Arc<Handler<C>>,
    stop: CancellationToken,
    /// Taken by `serve()`, or released by `close()` if never served.
    listener: Mutex<Option<UnixListener>>,
    p2p_port: u16,
    rpc_port: u16,
    log_dir: TempDir,
    watcher: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl<C: ProcessController> ControlServer<C> {
    /// Start `node` and bind the control socket.
    ///
    /// Ports left at 0 in `config` are taken from `ports`. A stale file at the
    /// socket path is removed first.
    pub async fn bind(config: &ServerConfig, ports: &PortAllocator, node: C) -> Result<Self> {
        let rpc_port = match config.rpc_port {
            0 => ports.allocate_async().await?,
            port => port,
        };
        let p2p_port = match config.p2p_port {
            0 => ports.allocate_async().await?,
            port => port,
        };

        let log_dir = tempfile::Builder::new().suffix("-simd").tempdir()?;
        let options =
            NodeOptions::new(p2p_port, rpc_port, log_dir.path()).with_log_level(config.log_level);

        let node = Arc::new(node);
        node.start(&options)
            .await
            .map_err(|e| SimError::upstream("start node", e))?;

        let listener = match Self::listen(&config.socket_path) {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(stop_err) = node.stop().await {
                    warn!("Failed to stop node after bind error: {}", stop_err);
                }
                return Err(e);
            }
        };

        let watcher = if config.log_level != LogLevel::Off {
            let path = options.log_file(config.params.name);
            info!("Tailing node log {}", path.display());
            Some(LogWatcher::stdout(path).spawn())
        } else {
            None
        };

        let stop = CancellationToken::new();
        let handler = Arc::new(Handler::new(node, config.params.clone(), p2p_port, stop.clone()));

        info!(
            "Control server listening on {} (p2p :{}, rpc :{})",
            config.socket_path.display(),
            p2p_port,
            rpc_port
        );

        Ok(Self {
            socket_path: config.socket_path.clone(),
            handler,
            stop,
            listener: Mutex::new(Some(listener)),
            p2p_port,
            rpc_port,
            log_dir,
            watcher: Mutex::new(watcher),
        })
    }

    fn listen(path: &Path) -> Result<UnixListener> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SimError::io_with_path(e, path)),
        }

        UnixListener::bind(path).map_err(|e| SimError::io_with_path(e, path))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn p2p_port(&self) -> u16 {
        self.p2p_port
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    /// Directory handed to the node for its logs.
    pub fn log_dir(&self) -> &Path {
        self.log_dir.path()
    }

    pub fn handler(&self) -> &Arc<Handler<C>> {
        &self.handler
    }

    /// Token that stops the accept loop when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the accept loop.
    ///
    /// Returns `Ok(())` once stop is requested, or the listener's error if
    /// accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .map_err(|_| SimError::Other("listener lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| SimError::Other("listener already closed".to_string()))?;

        let accepted = {
            let listener = &listener;
            accept_loop(
                &self.stop,
                move || listener.accept(),
                |(stream, _)| {
                    let handler = self.handler.clone();
                    let stop = self.stop.clone();
                    tokio::spawn(async move {
                        debug!("Control connection opened");
                        if let Err(e) = handle_connection(stream, &*handler, &stop).await {
                            debug!("Control connection ended: {}", e);
                        }
                    });
                },
            )
            .await
        };

        drop(listener);
        self.unlink_socket();
        accepted.map_err(|e| SimError::io_with_path(e, &self.socket_path))
    }

    /// Tear down the node and release the socket.
    ///
    /// Safe to call after the accept loop has exited, and more than once. A
    /// teardown failure is returned after the socket has been released.
    pub async fn close(&self) -> Result<()> {
        let teardown = self.handler.teardown().await;
        self.stop.cancel();

        let unserved = match self.listener.lock() {
            Ok(mut listener) => listener.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(listener) = unserved {
            drop(listener);
            self.unlink_socket();
        }

        self.abort_watcher();
        teardown
    }

    fn unlink_socket(&self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed socket {}", self.socket_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove socket {}: {}",
                self.socket_path.display(),
                e
            ),
        }
    }

    fn abort_watcher(&self) {
        let watcher = match self.watcher.lock() {
            Ok(mut watcher) => watcher.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = watcher {
            handle.abort();
        }
    }
}

impl<C: ProcessController> Drop for ControlServer<C> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.abort_watcher();
    }
}

/// Race `accept` against `stop` until one of them ends the loop.
///
/// Every accepted item is handed to `on_accept`. The first accept error ends
/// the loop and is returned.
async fn accept_loop<T, A, Fut, H>(
    stop: &CancellationToken,
    mut accept: A,
    mut on_accept: H,
) -> std::io::Result<()>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
    H: FnMut(T),
{
    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                info!("Control server stopping");
                return Ok(());
            }
            accepted = accept() => match accepted {
                Ok(item) => on_accept(item),
                Err(e) => {
                    error!("Control socket accept error: {}", e);
                    return Err(e);
                }
            },
        }
    }
}

/// Serve requests on one connection, in order, until the peer disconnects or
/// stop is requested between requests.
async fn handle_connection<D: IpcDispatch>(
    mut stream: UnixStream,
    dispatch: &D,
    stop: &CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();

    loop {
        let frame = tokio::select! {
            biased;

            _ = stop.cancelled() => return Ok(()),
            result = read_frame(&mut reader) => match result? {
                Some(f) => f,
                None => return Ok(()), // Clean disconnect
            },
        };

        let response = process_request(&frame, dispatch).await;

        let response_bytes = serde_json::to_vec(&response)?;
        write_frame(&mut writer, &response_bytes).await?;
    }
}

async fn process_request<D: IpcDispatch>(frame: &[u8], dispatch: &D) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_slice(frame) {
        Ok(req) => req,
        Err(e) => {
            return IpcResponse::error(None, -32700, format!("Parse error: {}", e));
        }
    };

    if request.jsonrpc != "2.0" {
        return IpcResponse::error(
            request.id,
            -32600,
            "Invalid Request: expected jsonrpc 2.0".to_string(),
        );
    }

    let params = request
        .params
        .filter(|p| !p.is_null())
        .unwrap_or(serde_json::Value::Object(Default::default()));

    match dispatch.dispatch(&request.method, params).await {
        Ok(result) => IpcResponse::success(request.id, result),
        Err(e) => IpcResponse::error(request.id, e.to_rpc_error_code(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc_codes;
    use crate::node::SimNode;
    use std::time::Duration;

    async fn bind_sim(dir: &TempDir) -> ControlServer<SimNode> {
        let config = ServerConfig::new(dir.path().join("simd.sock"));
        ControlServer::bind(&config, &PortAllocator::new(), SimNode::default())
            .await
            .unwrap()
    }

    async fn roundtrip(stream: &mut UnixStream, payload: &[u8]) -> IpcResponse {
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, payload).await.unwrap();
        let bytes = read_frame(&mut reader).await.unwrap().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bind_allocates_distinct_ports() {
        let dir = TempDir::new().unwrap();
        let server = bind_sim(&dir).await;

        assert!(server.p2p_port() > 0);
        assert!(server.rpc_port() > 0);
        assert_ne!(server.p2p_port(), server.rpc_port());
        assert!(server.socket_path().exists());

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_keeps_explicit_ports() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path().join("simd.sock"))
            .with_p2p_port(18555)
            .with_rpc_port(18556);

        // An allocator with nothing to give proves no allocation happened.
        let ports = PortAllocator::with_range(0..=0);
        let server = ControlServer::bind(&config, &ports, SimNode::default())
            .await
            .unwrap();

        assert_eq!(server.p2p_port(), 18555);
        assert_eq!(server.rpc_port(), 18556);
        assert!(ports.allocated().is_empty());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("simd.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = bind_sim(&dir).await;
        UnixStream::connect(&path).await.unwrap();

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_stops_node() {
        let dir = TempDir::new().unwrap();
        // A directory can't be unlinked with remove_file.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();

        let node = Arc::new(SimNode::default());
        let config = ServerConfig::new(&path).with_p2p_port(1).with_rpc_port(2);
        let result = ControlServer::bind(&config, &PortAllocator::new(), SharedNode(node.clone())).await;

        assert!(result.is_err());
        assert!(matches!(
            node.tip().await,
            Err(SimError::NodeStopped)
        ));
    }

    #[tokio::test]
    async fn test_serve_answers_requests() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(bind_sim(&dir).await);
        let accept = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let mut stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let request = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "2.0", "method": "Ping", "id": 1
        }))
        .unwrap();
        let response = roundtrip(&mut stream, &request).await;
        assert_eq!(response.result, Some(serde_json::json!("pong")));

        server.stop_token().cancel();
        tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_reports_protocol_errors() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(bind_sim(&dir).await);
        let _accept = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let mut stream = UnixStream::connect(server.socket_path()).await.unwrap();

        let response = roundtrip(&mut stream, b"not valid json").await;
        assert_eq!(response.error.unwrap().code, rpc_codes::PARSE_ERROR);

        let unknown = serde_json::to_vec(&IpcRequest::new("Nope", serde_json::json!({}), 2)).unwrap();
        let response = roundtrip(&mut stream, &unknown).await;
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);

        let old = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "1.0", "method": "Ping", "id": 3
        }))
        .unwrap();
        let response = roundtrip(&mut stream, &old).await;
        assert_eq!(response.error.unwrap().code, rpc_codes::INVALID_REQUEST);

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_listener_and_idle_connections() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(bind_sim(&dir).await);
        let accept = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let mut idle = UnixStream::connect(server.socket_path()).await.unwrap();
        let mut stopper = UnixStream::connect(server.socket_path()).await.unwrap();

        let stop = serde_json::to_vec(&IpcRequest::new("Stop", serde_json::json!({}), 1)).unwrap();
        let response = roundtrip(&mut stopper, &stop).await;
        assert!(response.error.is_none());

        tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!server.socket_path().exists());
        assert!(UnixStream::connect(server.socket_path()).await.is_err());

        // The idle connection is closed rather than served.
        let (mut reader, _writer) = idle.split();
        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut reader))
            .await
            .unwrap()
            .unwrap();
        assert!(frame.is_none());

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_error_ends_loop() {
        let stop = CancellationToken::new();
        let mut remaining = 2;
        let mut served = Vec::new();

        let result = accept_loop(
            &stop,
            || {
                remaining -= 1;
                let outcome = if remaining >= 0 {
                    Ok(remaining)
                } else {
                    Err(std::io::Error::new(ErrorKind::Other, "listener gone"))
                };
                async move { outcome }
            },
            |item| served.push(item),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "listener gone");
        assert_eq!(served, vec![1, 0]);
        assert!(!stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_accept_loop_prefers_stop() {
        let stop = CancellationToken::new();
        stop.cancel();

        let mut accepted = 0;
        let result = accept_loop(
            &stop,
            || async { Ok::<_, std::io::Error>(()) },
            |_| accepted += 1,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn test_accept_loop_waits_for_stop() {
        let stop = CancellationToken::new();
        let canceller = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            accept_loop(
                &stop,
                std::future::pending::<std::io::Result<()>>,
                |_| {},
            ),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let server = bind_sim(&dir).await;

        server.close().await.unwrap();
        server.close().await.unwrap();

        assert!(!server.socket_path().exists());
        assert!(server.serve().await.is_err());
    }

    /// Lets a test keep a handle on the node the server owns.
    struct SharedNode(Arc<SimNode>);

    #[async_trait::async_trait]
    impl ProcessController for SharedNode {
        async fn start(&self, options: &NodeOptions) -> Result<()> {
            self.0.start(options).await
        }
        async fn stop(&self) -> Result<()> {
            self.0.stop().await
        }
        async fn generate_blocks(&self, count: u32) -> Result<Vec<crate::chain::BlockHash>> {
            self.0.generate_blocks(count).await
        }
        async fn send_funds(&self, output: crate::chain::TxOut) -> Result<crate::chain::Txid> {
            self.0.send_funds(output).await
        }
        async fn tip(&self) -> Result<crate::node::ChainTip> {
            self.0.tip().await
        }
    }
}
