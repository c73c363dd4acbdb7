//! Error types for ledger client operations.

use ledgerbench_types::Hash;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`LedgerClient`](crate::LedgerClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The ledger refused the transaction.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// The transaction was included but failed to execute.
    #[error("Transaction {hash} failed on chain: {reason}")]
    Failed { hash: Hash, reason: String },

    /// A response could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Encoding the transaction failed.
    #[error("Transaction encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Waiting for a result took longer than allowed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The block subscription is no longer available.
    #[error("Block subscription closed")]
    SubscriptionClosed,
}

impl ClientError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) | ClientError::Timeout(_) => true,
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
