//! Control socket client.
//!
//! Dials a running control server and issues typed calls over one connection.
//!
//! # Thread Safety
//!
//! The client uses a tokio `Mutex` to serialize access to the stream, so one
//! request-response exchange completes before the next begins.

use super::protocol::{
    read_frame, write_frame, AddressInfo, Empty, IpcResponse, MineRequest, MineResult, Request,
    SendRequest, SendResult, TipInfo,
};
use crate::chain::{BlockHash, Txid};
use crate::config::ControlConfig;
use crate::error::{Result, SimError};
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A connection to a control server.
#[derive(Debug)]
pub struct ControlClient {
    stream: Mutex<UnixStream>,
    path: PathBuf,
    next_id: AtomicU64,
}

impl ControlClient {
    /// Connect to the control socket at `path`.
    ///
    /// A missing socket or one nobody is accepting on is `SocketUnavailable`.
    pub async fn dial(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let stream = UnixStream::connect(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => SimError::SocketUnavailable {
                path: path.clone(),
                source: e,
            },
            _ => SimError::io_with_path(e, &path),
        })?;

        debug!("Control client connected to {}", path.display());

        Ok(Self {
            stream: Mutex::new(stream),
            path,
            next_id: AtomicU64::new(1),
        })
    }

    /// Dial, retrying every `interval` while the socket file does not exist yet.
    ///
    /// Any other failure is returned at once. Gives up with the last
    /// `SocketUnavailable` once `timeout` has elapsed.
    pub async fn dial_until_ready(
        path: impl AsRef<Path>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match Self::dial(path).await {
                Ok(client) => return Ok(client),
                Err(SimError::SocketUnavailable { source, .. })
                    if source.kind() == ErrorKind::NotFound
                        && tokio::time::Instant::now() + interval <= deadline =>
                {
                    trace!("Socket {} not ready, retrying", path.display());
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Path this client is connected to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one request and decode its result.
    ///
    /// Errors reported by the server come back as `SimError::Remote` carrying
    /// the server's code.
    pub async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let request_bytes = serde_json::to_vec(&request.to_ipc(id)?)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes).await?;

        let response_bytes = read_frame(&mut reader)
            .await?
            .ok_or(SimError::ConnectionClosed)?;

        let response: IpcResponse =
            serde_json::from_slice(&response_bytes).map_err(|e| SimError::Json {
                message: format!("Failed to parse {} response: {}", method, e),
                source: Some(e),
            })?;

        if let Some(err) = response.error {
            return Err(SimError::from_remote(err.code, err.message));
        }

        let result = response.result.ok_or_else(|| SimError::UnexpectedReply {
            expected: format!("{} result", method),
            actual: "response without result".to_string(),
        })?;

        serde_json::from_value(result).map_err(|e| SimError::UnexpectedReply {
            expected: format!("{} result", method),
            actual: e.to_string(),
        })
    }

    /// Liveness probe. Any reply other than `"pong"` is `UnexpectedReply`.
    pub async fn ping(&self) -> Result<()> {
        let reply: String = self.call(Request::Ping(Empty {})).await?;
        if reply != "pong" {
            return Err(SimError::UnexpectedReply {
                expected: "pong".to_string(),
                actual: reply,
            });
        }
        Ok(())
    }

    /// P2P endpoint of the backing node, e.g. `":18555"`.
    pub async fn address(&self) -> Result<String> {
        let info: AddressInfo = self.call(Request::Address(Empty {})).await?;
        Ok(info.p2p)
    }

    pub async fn send(&self, address: impl Into<String>, amount: i64) -> Result<Txid> {
        let result: SendResult = self
            .call(Request::Send(SendRequest {
                address: address.into(),
                amount,
            }))
            .await?;
        Ok(result.txid)
    }

    pub async fn mine(&self, count: u32) -> Result<Vec<BlockHash>> {
        let result: MineResult = self.call(Request::Mine(MineRequest { count })).await?;
        Ok(result.blocks)
    }

    pub async fn best_block(&self) -> Result<TipInfo> {
        self.call(Request::BestBlock(Empty {})).await
    }

    /// Ask the server to tear down its node and stop.
    ///
    /// The server may close the connection before its reply is read; that
    /// counts as success.
    pub async fn stop(&self) -> Result<()> {
        match self.call::<Empty>(Request::Stop(Empty {})).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_connection_closed() => {
                debug!("Connection closed during stop");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Block until the best block height reaches `height`, polling once a second.
    pub async fn sync(&self, height: i32) -> Result<()> {
        self.sync_every(height, ControlConfig::SYNC_POLL_INTERVAL)
            .await
            .map(|_| ())
    }

    /// Poll `BestBlock` every `interval` until the height reaches `height`.
    ///
    /// A failed query ends the loop with its error. Returns the number of
    /// polls made.
    pub async fn sync_every(&self, height: i32, interval: Duration) -> Result<u32> {
        let mut polls = 0;
        loop {
            let tip = self.best_block().await?;
            polls += 1;

            if tip.height >= height {
                debug!("Synced to height {} after {} polls", tip.height, polls);
                return Ok(polls);
            }

            tokio::time::sleep(interval).await;
        }
    }
}
