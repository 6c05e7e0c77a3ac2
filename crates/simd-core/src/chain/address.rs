//! Address decoding for base58check and segwit (bech32/bech32m) addresses.

use super::{sha256d, ChainParams};
use crate::error::{Result, SimError};

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Longest address either encoding can produce (the bech32 limit).
const MAX_ADDRESS_LEN: usize = 90;

const BECH32_CONST: u32 = 1;
const BECH32M_CONST: u32 = 0x2bc8_30a3;

/// A decoded payment address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    PubKeyHash([u8; 20]),
    ScriptHash([u8; 20]),
    /// Any segwit program, version 0 through 16.
    Witness { version: u8, program: Vec<u8> },
}

/// Decode `s` as an address on the `params` network.
pub fn decode_address(s: &str, params: &ChainParams) -> Result<Address> {
    let invalid = |message: String| SimError::InvalidAddress {
        address: if s.len() > MAX_ADDRESS_LEN {
            format!("{}...", s.chars().take(MAX_ADDRESS_LEN).collect::<String>())
        } else {
            s.to_string()
        },
        message,
    };

    if s.len() > MAX_ADDRESS_LEN {
        return Err(invalid(format!(
            "{} characters, longer than any address",
            s.len()
        )));
    }

    let hrp_prefix = format!("{}1", params.bech32_hrp);
    if s.len() > hrp_prefix.len() && s.to_lowercase().starts_with(&hrp_prefix) {
        return decode_segwit(s, params.bech32_hrp).map_err(invalid);
    }

    let payload = base58check_decode(s).map_err(invalid)?;
    if payload.len() != 21 {
        return Err(invalid(format!(
            "decoded payload is {} bytes, expected 21",
            payload.len()
        )));
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);

    match payload[0] {
        id if id == params.pubkey_hash_addr_id => Ok(Address::PubKeyHash(hash)),
        id if id == params.script_hash_addr_id => Ok(Address::ScriptHash(hash)),
        id => Err(invalid(format!(
            "version byte {:#04x} is not a {} address",
            id, params.name
        ))),
    }
}

fn base58check_decode(s: &str) -> std::result::Result<Vec<u8>, String> {
    if s.is_empty() {
        return Err("empty address".to_string());
    }

    // Little-endian base-256 accumulator, reversed once at the end.
    let mut bytes: Vec<u8> = Vec::with_capacity(s.len());
    for c in s.bytes() {
        let digit = BASE58_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| format!("invalid base58 character {:?}", c as char))?;

        let mut carry = digit as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = s.bytes().take_while(|&c| c == b'1').count();
    let mut data = vec![0u8; leading_zeros];
    data.extend(bytes.iter().rev());

    if data.len() < 4 {
        return Err("too short for a checksum".to_string());
    }

    let (payload, checksum) = data.split_at(data.len() - 4);
    if sha256d(payload)[..4] != *checksum {
        return Err("checksum mismatch".to_string());
    }

    Ok(payload.to_vec())
}

fn decode_segwit(s: &str, expected_hrp: &str) -> std::result::Result<Address, String> {
    let (hrp, data, constant) = bech32_decode(s)?;
    if hrp != expected_hrp {
        return Err(format!("unexpected prefix {:?}", hrp));
    }

    let (&version, rest) = data
        .split_first()
        .ok_or_else(|| "missing witness version".to_string())?;
    if version > 16 {
        return Err(format!("invalid witness version {}", version));
    }

    let expected_const = if version == 0 {
        BECH32_CONST
    } else {
        BECH32M_CONST
    };
    if constant != expected_const {
        return Err(format!("wrong checksum variant for witness version {}", version));
    }

    let program = convert_bits(rest, 5, 8, false)?;
    if !(2..=40).contains(&program.len()) {
        return Err(format!("invalid witness program length {}", program.len()));
    }
    if version == 0 && program.len() != 20 && program.len() != 32 {
        return Err(format!(
            "invalid version 0 witness program length {}",
            program.len()
        ));
    }

    Ok(Address::Witness { version, program })
}

/// Returns the lowercased HRP, the data part without checksum, and the
/// checksum constant that verified (bech32 or bech32m).
fn bech32_decode(s: &str) -> std::result::Result<(String, Vec<u8>, u32), String> {
    let has_lower = s.bytes().any(|c| c.is_ascii_lowercase());
    let has_upper = s.bytes().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err("mixed case".to_string());
    }
    if s.len() > 90 {
        return Err("too long".to_string());
    }

    let s = s.to_lowercase();
    let sep = s.rfind('1').ok_or_else(|| "missing separator".to_string())?;
    if sep == 0 || sep + 7 > s.len() {
        return Err("invalid separator position".to_string());
    }

    let (hrp, rest) = (&s[..sep], &s[sep + 1..]);
    let data = rest
        .bytes()
        .map(|c| {
            BECH32_CHARSET
                .iter()
                .position(|&a| a == c)
                .map(|p| p as u8)
                .ok_or_else(|| format!("invalid bech32 character {:?}", c as char))
        })
        .collect::<std::result::Result<Vec<u8>, String>>()?;

    let mut values = hrp_expand(hrp);
    values.extend_from_slice(&data);
    let constant = match polymod(&values) {
        BECH32_CONST => BECH32_CONST,
        BECH32M_CONST => BECH32M_CONST,
        _ => return Err("checksum mismatch".to_string()),
    };

    Ok((hrp.to_string(), data[..data.len() - 6].to_vec(), constant))
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|c| c >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|c| c & 31));
    out
}

fn polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];

    let mut chk: u32 = 1;
    for &v in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ v as u32;
        for (i, g) in GEN.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> std::result::Result<Vec<u8>, String> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max = (1u32 << to) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        acc = (acc << from) | value as u32;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
        return Err("invalid padding".to_string());
    }

    Ok(out)
}
