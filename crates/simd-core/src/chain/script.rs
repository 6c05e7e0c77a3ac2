use super::Address;
use crate::error::{Result, SimError};

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;

/// Raw output script bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A transaction output paying `value` base units to `script_pubkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: i64, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// Wire encoding: 8-byte LE value, compact length, script.
    pub fn serialize(&self) -> Vec<u8> {
        let script = self.script_pubkey.as_bytes();
        let mut out = Vec::with_capacity(9 + script.len());
        out.extend_from_slice(&self.value.to_le_bytes());
        // Standard scripts are well under 0xfd bytes.
        out.push(script.len() as u8);
        out.extend_from_slice(script);
        out
    }
}

/// Build the standard output script paying `address`.
///
/// Witness versions 0 and 1 are payable; later versions decode but have no
/// script template here yet.
pub fn pay_to_addr_script(address: &Address) -> Result<Script> {
    let script = match address {
        Address::PubKeyHash(hash) => {
            let mut s = vec![OP_DUP, OP_HASH160, 20];
            s.extend_from_slice(hash);
            s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            s
        }
        Address::ScriptHash(hash) => {
            let mut s = vec![OP_HASH160, 20];
            s.extend_from_slice(hash);
            s.push(OP_EQUAL);
            s
        }
        Address::Witness { version, program } => {
            let op = match version {
                0 => OP_0,
                1 => OP_1,
                v => {
                    return Err(SimError::Script {
                        message: format!("unsupported witness version {}", v),
                    })
                }
            };
            let mut s = vec![op, program.len() as u8];
            s.extend_from_slice(program);
            s
        }
    };

    Ok(Script(script))
}
