//! Core types shared by the ledgerbench crates.
//!
//! - [`Hash`]: Blake3 transaction/block hashes
//! - [`KeyPair`], [`PublicKey`], [`Signature`]: Ed25519 signing identities
//! - [`Transaction`], [`SignedTransaction`], [`Payload`], [`TxKind`]
//! - [`BlockEvent`], [`Receipt`], [`ChainMetadata`]: what the ledger reports back

mod block;
mod crypto;
mod hash;
mod identifiers;
mod signing;
mod transaction;

pub use block::{BlockEvent, ChainMetadata, Receipt};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::{Address, BlockHeight, ChainId};
pub use signing::{transaction_message, DOMAIN_TRANSACTION};
pub use transaction::{Payload, SignedTransaction, Transaction, TxKind, UnknownTxKind};

/// Fixtures for tests in downstream crates.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// A signed transfer from the identity derived from `seed`.
    pub fn test_transaction(seed: u64, nonce: u64) -> SignedTransaction {
        let kp = KeyPair::from_u64_seed(seed);
        let to = Address::from_public_key(&KeyPair::from_u64_seed(seed + 1).public_key());
        Transaction::new(kp.public_key(), nonce, Payload::Transfer { to, amount: 1 }).sign(&kp)
    }

    /// A deterministic hash for use as a fake transaction id.
    pub fn test_hash(n: u64) -> Hash {
        Hash::from_bytes(&n.to_le_bytes())
    }
}
