use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

macro_rules! hash_newtype {
    ($name:ident, $what:literal) => {
        #[doc = concat!("32-byte ", $what, " identifier.")]
        ///
        /// Displayed and serialized as hex in reversed byte order, the way
        /// node RPC interfaces print it.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Hash `data` with double SHA-256.
            pub fn hash(data: &[u8]) -> Self {
                Self(sha256d(data))
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                write!(f, "{}", hex::encode(reversed))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                bytes.reverse();
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_newtype!(BlockHash, "block");
hash_newtype!(Txid, "transaction");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256d_empty() {
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = BlockHash(bytes);

        let shown = hash.to_string();
        assert_eq!(shown.len(), 64);
        assert!(shown.ends_with("ab"));
        assert_eq!(shown.parse::<BlockHash>().unwrap(), hash);
    }

    #[test]
    fn test_serde_uses_display_form() {
        let txid = Txid::hash(b"payload");
        let json = serde_json::to_string(&txid).unwrap();
        assert_eq!(json, format!("\"{}\"", txid));

        let parsed: Txid = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, txid);
    }

    #[test]
    fn test_rejects_short_hex() {
        assert!("abcd".parse::<Txid>().is_err());
    }
}
