//! Translates control requests into backing node calls.

use super::protocol::{
    AddressInfo, Empty, MineRequest, MineResult, Reply, Request, SendRequest, SendResult, TipInfo,
};
use super::server::IpcDispatch;
use crate::cancel::CancellationToken;
use crate::chain::{decode_address, pay_to_addr_script, ChainParams, TxOut};
use crate::error::{Result, SimError};
use crate::node::ProcessController;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Serves the six control methods against a backing node.
///
/// The handler never retries; node failures are wrapped with the operation
/// that was attempted and passed back to the caller.
pub struct Handler<C: ProcessController> {
    node: Arc<C>,
    params: ChainParams,
    p2p_port: u16,
    stop: CancellationToken,
    /// Set once the node has been torn down successfully.
    torn_down: Mutex<bool>,
}

impl<C: ProcessController> Handler<C> {
    /// Create a handler for a node already started on `p2p_port`.
    ///
    /// `stop` is cancelled when a `Stop` request has torn the node down.
    pub fn new(node: Arc<C>, params: ChainParams, p2p_port: u16, stop: CancellationToken) -> Self {
        Self {
            node,
            params,
            p2p_port,
            stop,
            torn_down: Mutex::new(false),
        }
    }

    pub fn node(&self) -> &Arc<C> {
        &self.node
    }

    /// Liveness probe.
    pub async fn ping(&self, _: Empty) -> Result<String> {
        Ok("pong".to_string())
    }

    pub async fn address(&self, _: Empty) -> Result<AddressInfo> {
        Ok(AddressInfo {
            p2p: format!(":{}", self.p2p_port),
        })
    }

    /// Pay `amount` to `address` from the node's wallet.
    pub async fn send(&self, request: SendRequest) -> Result<SendResult> {
        let address = decode_address(&request.address, &self.params)?;
        let script = pay_to_addr_script(&address)?;

        let txid = self
            .node
            .send_funds(TxOut::new(request.amount, script))
            .await
            .map_err(|e| SimError::upstream("send output to testing address", e))?;

        debug!("Sent {} to {}: {}", request.amount, request.address, txid);
        Ok(SendResult { txid })
    }

    pub async fn mine(&self, request: MineRequest) -> Result<MineResult> {
        let blocks = self
            .node
            .generate_blocks(request.count)
            .await
            .map_err(|e| SimError::upstream("generate blocks", e))?;

        Ok(MineResult { blocks })
    }

    /// Live query of the node's best block.
    pub async fn best_block(&self, _: Empty) -> Result<TipInfo> {
        let tip = self
            .node
            .tip()
            .await
            .map_err(|e| SimError::upstream("query best block", e))?;

        Ok(tip.into())
    }

    /// Tear the node down, then signal the server to stop accepting.
    pub async fn stop(&self, _: Empty) -> Result<Empty> {
        self.teardown().await?;
        info!("Stop requested");
        self.stop.cancel();
        Ok(Empty {})
    }

    /// Stop the backing node once.
    ///
    /// Later calls succeed without touching the node. A failed teardown is
    /// not recorded, so it can be retried.
    pub async fn teardown(&self) -> Result<()> {
        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return Ok(());
        }

        self.node
            .stop()
            .await
            .map_err(|e| SimError::upstream("tear down node", e))?;
        *torn_down = true;
        Ok(())
    }

    /// Serve one request.
    pub async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Ping(args) => self.ping(args).await.map(Reply::Pong),
            Request::Address(args) => self.address(args).await.map(Reply::Address),
            Request::Send(args) => self.send(args).await.map(Reply::Send),
            Request::Mine(args) => self.mine(args).await.map(Reply::Mine),
            Request::BestBlock(args) => self.best_block(args).await.map(Reply::BestBlock),
            Request::Stop(args) => self.stop(args).await.map(Reply::Stop),
        }
    }
}

#[async_trait::async_trait]
impl<C: ProcessController> IpcDispatch for Handler<C> {
    async fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let request = Request::parse(method, params)?;
        let reply = self.handle(request).await?;
        Ok(serde_json::to_value(reply)?)
    }
}
