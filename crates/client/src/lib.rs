//! Ledger client interface consumed by the load generator.
//!
//! The engine only ever talks to a ledger through [`LedgerClient`]. This crate
//! provides the trait, its error type and [`HttpLedgerClient`], a JSON-over-HTTP
//! implementation. Tests use the in-process mock from
//! `ledgerbench-test-helpers` instead.

mod error;
mod http;
pub mod types;

pub use error::ClientError;
pub use http::{HttpClientConfig, HttpLedgerClient};

use async_trait::async_trait;
use futures::stream::BoxStream;
use ledgerbench_types::{Address, BlockEvent, ChainMetadata, Hash, Receipt, SignedTransaction};

/// Lazy, infinite, non-restartable stream of committed blocks.
///
/// The stream ends only when the underlying subscription is closed.
pub type BlockStream = BoxStream<'static, BlockEvent>;

/// Capabilities the load generator needs from a ledger endpoint.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Submit a transaction without waiting for inclusion.
    async fn submit(&self, tx: &SignedTransaction) -> Result<Hash, ClientError>;

    /// Submit a transaction and wait until it is included in a block.
    async fn submit_and_wait(&self, tx: &SignedTransaction) -> Result<Receipt, ClientError>;

    /// Open a subscription to committed blocks.
    async fn subscribe_blocks(&self) -> Result<BlockStream, ClientError>;

    /// Current chain metadata.
    async fn chain_metadata(&self) -> Result<ChainMetadata, ClientError>;

    /// Next expected nonce for `address`.
    async fn account_nonce(&self, address: &Address) -> Result<u64, ClientError>;
}
