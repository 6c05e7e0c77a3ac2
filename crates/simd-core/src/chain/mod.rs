//! Chain primitives the control plane needs to talk about simnet.
//!
//! Only what the handler and the simulated node use: network parameters,
//! block and transaction identifiers, address decoding and output scripts.

mod address;
mod hash;
mod script;

pub use address::{decode_address, Address};
pub use hash::{sha256d, BlockHash, Txid};
pub use script::{pay_to_addr_script, Script, TxOut};

/// Network parameters used to decode addresses and size the block subsidy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub name: &'static str,
    /// Version byte of base58 pay-to-pubkey-hash addresses.
    pub pubkey_hash_addr_id: u8,
    /// Version byte of base58 pay-to-script-hash addresses.
    pub script_hash_addr_id: u8,
    /// Human-readable part of segwit addresses.
    pub bech32_hrp: &'static str,
    /// Coinbase value credited for every mined block.
    pub block_subsidy: i64,
    /// Fee rate applied to sends, per byte.
    pub fee_rate: i64,
}

impl ChainParams {
    /// The private simulation network.
    pub const SIMNET: ChainParams = ChainParams {
        name: "simnet",
        pubkey_hash_addr_id: 0x3f,
        script_hash_addr_id: 0x7b,
        bech32_hrp: "sb",
        block_subsidy: 5_000_000_000,
        fee_rate: 10,
    };
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::SIMNET
    }
}
