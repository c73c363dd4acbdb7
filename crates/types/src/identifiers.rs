//! Domain-specific identifier types.

use crate::{Hash, HexError, PublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Account address: the first 20 bytes of the Blake3 hash of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Size of an address in bytes.
    pub const BYTES: usize = 20;

    /// Derive the account address controlled by `public_key`.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Hash::from_bytes(public_key.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Address(bytes)
    }

    /// Parse from a hex string with optional `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 40 {
            return Err(HexError::InvalidLength {
                expected: 40,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| HexError::InvalidHex)?;
        Ok(Address(bytes))
    }

    /// `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a ledger (used as the target of cross-chain messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain({})", self.0)
    }
}

/// Block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    /// Genesis block height.
    pub const GENESIS: Self = BlockHeight(0);

    /// Get the next block height.
    pub fn next(self) -> Self {
        BlockHeight(self.0 + 1)
    }

    /// Number of blocks from `earlier` to `self` (zero if `earlier` is ahead).
    pub fn blocks_since(self, earlier: BlockHeight) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    #[test]
    fn test_address_derivation_is_stable() {
        let kp = KeyPair::from_u64_seed(3);
        let a1 = Address::from_public_key(&kp.public_key());
        let a2 = Address::from_public_key(&kp.public_key());
        assert_eq!(a1, a2);
        assert_eq!(Address::from_hex(&a1.to_hex()).unwrap(), a1);
    }

    #[test]
    fn test_blocks_since_saturates() {
        assert_eq!(BlockHeight(10).blocks_since(BlockHeight(4)), 6);
        assert_eq!(BlockHeight(4).blocks_since(BlockHeight(10)), 0);
    }
}
