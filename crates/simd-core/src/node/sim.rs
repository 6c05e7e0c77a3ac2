//! In-process simnet chain.
//!
//! Mining is free and instant, every block pays its subsidy to the node's own
//! wallet, and sends are funded from that wallet. Block and transaction
//! identifiers are deterministic for a given sequence of calls.

use super::{ChainTip, NodeLog, NodeOptions, ProcessController};
use crate::chain::{sha256d, BlockHash, ChainParams, TxOut, Txid};
use crate::config::LogLevel;
use crate::error::{Result, SimError};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Serialized size of the single wallet input and the change output a send
/// carries besides the requested output.
const TX_OVERHEAD_BYTES: i64 = 10 + 148 + 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct PendingTx {
    txid: Txid,
    fee: i64,
}

#[derive(Debug)]
struct ChainState {
    status: Status,
    /// Block hashes by height; index 0 is genesis.
    blocks: Vec<BlockHash>,
    mempool: Vec<PendingTx>,
    /// Spendable wallet balance in base units.
    balance: i64,
    /// Distinguishes otherwise identical transactions.
    tx_nonce: u64,
    p2p_port: u16,
    log: NodeLog,
}

/// A simulated simnet node.
#[derive(Debug)]
pub struct SimNode {
    params: ChainParams,
    state: Mutex<ChainState>,
}

impl Default for SimNode {
    fn default() -> Self {
        Self::new(ChainParams::SIMNET)
    }
}

impl SimNode {
    pub fn new(params: ChainParams) -> Self {
        let genesis = BlockHash::hash(format!("{} genesis", params.name).as_bytes());
        Self {
            params,
            state: Mutex::new(ChainState {
                status: Status::Idle,
                blocks: vec![genesis],
                mempool: Vec::new(),
                balance: 0,
                tx_nonce: 0,
                p2p_port: 0,
                log: NodeLog::disabled(),
            }),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Spendable wallet balance.
    pub fn balance(&self) -> Result<i64> {
        Ok(self.lock()?.balance)
    }

    /// Number of unconfirmed transactions.
    pub fn mempool_len(&self) -> Result<usize> {
        Ok(self.lock()?.mempool.len())
    }

    /// Where the node writes its log, if logging is enabled.
    pub fn log_path(&self) -> Result<Option<PathBuf>> {
        let state = self.lock()?;
        if state.log.path().as_os_str().is_empty() {
            Ok(None)
        } else {
            Ok(Some(state.log.path().to_path_buf()))
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>> {
        self.state
            .lock()
            .map_err(|_| SimError::Other("node state lock poisoned".to_string()))
    }

    fn running(&self) -> Result<MutexGuard<'_, ChainState>> {
        let state = self.lock()?;
        if state.status != Status::Running {
            return Err(SimError::NodeStopped);
        }
        Ok(state)
    }

    fn mine_block(&self, state: &mut ChainState) -> BlockHash {
        let height = state.blocks.len() as u32;
        let prev = state.blocks[height as usize - 1];

        let coinbase = Txid::hash(&[b"coinbase".as_slice(), &height.to_le_bytes()].concat());
        let included: Vec<PendingTx> = state.mempool.drain(..).collect();

        let mut leaves = coinbase.as_bytes().to_vec();
        for tx in &included {
            leaves.extend_from_slice(tx.txid.as_bytes());
        }
        let merkle = sha256d(&leaves);

        let mut header = Vec::with_capacity(80);
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(prev.as_bytes());
        header.extend_from_slice(&merkle);
        header.extend_from_slice(&height.to_le_bytes());
        let hash = BlockHash::hash(&header);

        let fees = included
            .iter()
            .fold(0i64, |total, tx| total.saturating_add(tx.fee));
        state.balance = state
            .balance
            .saturating_add(self.params.block_subsidy.saturating_add(fees));
        state.blocks.push(hash);

        state.log.write(
            LogLevel::Info,
            "CHAN",
            &format!(
                "Connected block {} (height {}, {} transactions)",
                hash,
                height,
                included.len() + 1
            ),
        );

        hash
    }
}

#[async_trait::async_trait]
impl ProcessController for SimNode {
    async fn start(&self, options: &NodeOptions) -> Result<()> {
        let mut state = self.lock()?;
        if state.status == Status::Running {
            return Err(SimError::Other("node is already running".to_string()));
        }

        state.log = NodeLog::open(options.log_file(self.params.name), options.log_level)?;
        state.p2p_port = options.p2p_port;
        state.status = Status::Running;

        let height = state.blocks.len() - 1;
        state.log.write(
            LogLevel::Info,
            "SIMD",
            &format!(
                "Started {} node: p2p :{}, rpc :{}, height {}",
                self.params.name, options.p2p_port, options.rpc_port, height
            ),
        );
        info!(
            "Started {} node (p2p :{}, rpc :{})",
            self.params.name, options.p2p_port, options.rpc_port
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.status != Status::Running {
            return Ok(());
        }

        state.status = Status::Stopped;
        let port = state.p2p_port;
        state.log.write(LogLevel::Info, "SIMD", "Shutdown complete");
        info!("Stopped {} node (p2p :{})", self.params.name, port);
        Ok(())
    }

    async fn generate_blocks(&self, count: u32) -> Result<Vec<BlockHash>> {
        let mut state = self.running()?;

        let hashes: Vec<BlockHash> = (0..count).map(|_| self.mine_block(&mut state)).collect();
        debug!("Mined {} blocks, height {}", count, state.blocks.len() - 1);
        Ok(hashes)
    }

    async fn send_funds(&self, output: TxOut) -> Result<Txid> {
        let mut state = self.running()?;

        if output.value <= 0 {
            return Err(SimError::Other(format!(
                "transaction output value {} is not positive",
                output.value
            )));
        }

        let encoded = output.serialize();
        let fee = (encoded.len() as i64)
            .checked_add(TX_OVERHEAD_BYTES)
            .and_then(|size| size.checked_mul(self.params.fee_rate));
        let needed = fee.and_then(|fee| output.value.checked_add(fee));
        let balance = state.balance;
        let (needed, fee) = match (needed, fee) {
            (Some(needed), Some(fee)) if needed <= balance => (needed, fee),
            _ => {
                state.log.write(
                    LogLevel::Warn,
                    "WLLT",
                    &format!("Rejected send of {}: balance {}", output.value, balance),
                );
                return Err(SimError::Other(format!(
                    "insufficient funds: cannot pay {} plus fee from balance {}",
                    output.value, balance
                )));
            }
        };

        state.tx_nonce += 1;
        let mut raw = Vec::with_capacity(encoded.len() + 8);
        raw.extend_from_slice(&state.tx_nonce.to_le_bytes());
        raw.extend_from_slice(&encoded);
        let txid = Txid::hash(&raw);

        state.balance -= needed;
        state.mempool.push(PendingTx { txid, fee });
        state.log.write(
            LogLevel::Info,
            "WLLT",
            &format!("Broadcast transaction {} paying {}", txid, output.value),
        );
        Ok(txid)
    }

    async fn tip(&self) -> Result<ChainTip> {
        let state = self.running()?;
        let height = state.blocks.len() - 1;
        Ok(ChainTip {
            height: height as i32,
            hash: state.blocks[height],
        })
    }
}
