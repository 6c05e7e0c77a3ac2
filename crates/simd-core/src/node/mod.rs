//! The backing chain node, seen through the narrow interface the control
//! plane needs.
//!
//! The handler only ever starts, stops, mines on, funds from and queries the
//! node. Anything implementing [`ProcessController`] can sit behind a server;
//! [`SimNode`] is the in-process simnet implementation.

mod log;
mod sim;

pub use log::NodeLog;
pub use sim::SimNode;

use crate::chain::{BlockHash, TxOut, Txid};
use crate::config::LogLevel;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// How the node should be started.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// P2P listen port.
    pub p2p_port: u16,
    /// RPC listen port.
    pub rpc_port: u16,
    /// Directory the node writes its logs under.
    pub log_dir: PathBuf,
    /// Node log level; `Off` keeps the log directory empty.
    pub log_level: LogLevel,
}

impl NodeOptions {
    pub fn new(p2p_port: u16, rpc_port: u16, log_dir: impl AsRef<Path>) -> Self {
        Self {
            p2p_port,
            rpc_port,
            log_dir: log_dir.as_ref().to_path_buf(),
            log_level: LogLevel::Off,
        }
    }

    /// Set the node log level.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Path of the node's log file for the network `net`.
    pub fn log_file(&self, net: &str) -> PathBuf {
        self.log_dir.join(net).join("simd.log")
    }
}

/// The node's best block at the moment of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub height: i32,
    pub hash: BlockHash,
}

/// Capabilities of a backing node.
///
/// Implementations serialize their own internal state; callers add no
/// locking around these calls.
#[async_trait::async_trait]
pub trait ProcessController: Send + Sync + 'static {
    /// Bring the node up with the given options.
    async fn start(&self, options: &NodeOptions) -> Result<()>;

    /// Tear the node down. Stopping an already stopped node succeeds.
    async fn stop(&self) -> Result<()>;

    /// Mine `count` blocks, returning their hashes in chain order.
    async fn generate_blocks(&self, count: u32) -> Result<Vec<BlockHash>>;

    /// Fund `output` from the node's wallet and broadcast it.
    async fn send_funds(&self, output: TxOut) -> Result<Txid>;

    /// Current best block.
    async fn tip(&self) -> Result<ChainTip>;
}
