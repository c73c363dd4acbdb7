//! Types for RPC client communication.

use ledgerbench_types::{BlockEvent, BlockHeight, ChainId, ChainMetadata, Hash, Receipt};
use serde::{Deserialize, Serialize};

/// Request to submit a transaction.
#[derive(Debug, Serialize)]
pub struct SubmitTransactionRequest {
    pub transaction_hex: String,
}

/// Response from transaction submission.
#[derive(Debug, Deserialize)]
pub struct SubmitTransactionResponse {
    pub accepted: bool,
    #[serde(default)]
    pub hash: Option<Hash>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Inclusion state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Committed,
    Rejected,
}

/// Response from the transaction status endpoint.
#[derive(Debug, Deserialize)]
pub struct TransactionStatusResponse {
    pub hash: Hash,
    pub status: TransactionState,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TransactionStatusResponse {
    /// Convert a committed status into a receipt.
    pub fn into_receipt(self) -> Option<Receipt> {
        match self.status {
            TransactionState::Committed => Some(Receipt {
                tx_hash: self.hash,
                block_height: BlockHeight(self.block_height.unwrap_or_default()),
                success: self.success.unwrap_or(true),
                error: self.error,
            }),
            _ => None,
        }
    }
}

/// Response from node status endpoint.
#[derive(Debug, Deserialize)]
pub struct NodeStatusResponse {
    pub chain_id: u64,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub pending_transactions: u64,
    #[serde(default)]
    pub version: String,
}

impl From<NodeStatusResponse> for ChainMetadata {
    fn from(resp: NodeStatusResponse) -> Self {
        ChainMetadata {
            chain_id: ChainId(resp.chain_id),
            height: BlockHeight(resp.block_height),
            pending_transactions: resp.pending_transactions,
            version: resp.version,
        }
    }
}

/// Response from the block endpoint.
#[derive(Debug, Deserialize)]
pub struct BlockResponse {
    pub height: u64,
    pub hash: Hash,
    #[serde(default)]
    pub transactions: Vec<Hash>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl From<BlockResponse> for BlockEvent {
    fn from(resp: BlockResponse) -> Self {
        BlockEvent {
            height: BlockHeight(resp.height),
            hash: resp.hash,
            transactions: resp.transactions,
            timestamp_ms: resp.timestamp_ms,
        }
    }
}

/// Response from the account nonce endpoint.
#[derive(Debug, Deserialize)]
pub struct NonceResponse {
    pub nonce: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_status_becomes_receipt() {
        let hash = Hash::from_bytes(b"tx");
        let json = format!(
            r#"{{"hash":"{}","status":"committed","block_height":12,"success":true}}"#,
            hash
        );
        let resp: TransactionStatusResponse = serde_json::from_str(&json).unwrap();
        let receipt = resp.into_receipt().unwrap();
        assert_eq!(receipt.tx_hash, hash);
        assert_eq!(receipt.block_height, BlockHeight(12));
        assert!(receipt.success);
    }

    #[test]
    fn test_pending_status_has_no_receipt() {
        let hash = Hash::from_bytes(b"tx");
        let json = format!(r#"{{"hash":"{}","status":"pending"}}"#, hash);
        let resp: TransactionStatusResponse = serde_json::from_str(&json).unwrap();
        assert!(resp.into_receipt().is_none());
    }

    #[test]
    fn test_block_response_conversion() {
        let tx = Hash::from_bytes(b"a");
        let json = format!(
            r#"{{"height":3,"hash":"{}","transactions":["{}"]}}"#,
            Hash::from_bytes(b"block"),
            tx
        );
        let block: BlockEvent = serde_json::from_str::<BlockResponse>(&json)
            .unwrap()
            .into();
        assert_eq!(block.height, BlockHeight(3));
        assert_eq!(block.transactions, vec![tx]);
    }
}
