//! Block events, receipts and chain metadata observed from the ledger.

use crate::{BlockHeight, ChainId, Hash};
use serde::{Deserialize, Serialize};

/// A committed block as seen on the block stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    /// Height of the block.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: Hash,
    /// Hashes of the included transactions, in block order.
    pub transactions: Vec<Hash>,
    /// Block timestamp (milliseconds since UNIX epoch), when provided.
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl BlockEvent {
    /// Create a block event. The block hash is derived from the height and
    /// transaction hashes.
    pub fn new(height: BlockHeight, transactions: Vec<Hash>) -> Self {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(transactions.len() + 1);
        let height_bytes = height.0.to_le_bytes();
        parts.push(&height_bytes);
        for tx in &transactions {
            parts.push(tx.as_bytes());
        }
        Self {
            height,
            hash: Hash::from_parts(&parts),
            transactions,
            timestamp_ms: 0,
        }
    }

    /// Number of included transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Outcome of a transaction that has been included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction.
    pub tx_hash: Hash,
    /// Height of the including block.
    pub block_height: BlockHeight,
    /// Whether execution succeeded.
    pub success: bool,
    /// Failure reason reported by the ledger.
    #[serde(default)]
    pub error: Option<String>,
}

/// Summary of the ledger's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    /// Identifier of the chain.
    pub chain_id: ChainId,
    /// Latest committed height.
    pub height: BlockHeight,
    /// Transactions waiting in the node's mempool.
    #[serde(default)]
    pub pending_transactions: u64,
    /// Node software version.
    #[serde(default)]
    pub version: String,
}
