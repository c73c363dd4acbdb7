//! Test helpers for ledgerbench.
//!
//! [`MockLedger`] is an in-process ledger implementing
//! [`LedgerClient`]: submissions land in a mempool, a background task seals
//! the mempool into a block every `block_interval`, and every subscriber
//! receives the block. Latency, periodic failures and per-sender rejection
//! can be injected. It works under tokio's paused clock.

use async_trait::async_trait;
use futures::StreamExt;
use ledgerbench_client::{BlockStream, ClientError, LedgerClient};
use ledgerbench_types::{
    Address, BlockEvent, BlockHeight, ChainId, ChainMetadata, Hash, PublicKey, Receipt,
    SignedTransaction,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use ledgerbench_types::test_utils::{test_hash, test_transaction};

/// Behaviour of a [`MockLedger`].
#[derive(Debug, Clone)]
pub struct MockLedgerConfig {
    /// Chain identifier reported by `chain_metadata`.
    pub chain_id: ChainId,
    /// Time between sealed blocks.
    pub block_interval: Duration,
    /// Delay added to every `submit`.
    pub submit_latency: Duration,
    /// Every n-th submission is rejected (1-based).
    pub fail_every: Option<u64>,
    /// Senders whose transactions are always rejected.
    pub rejected_senders: HashSet<PublicKey>,
}

impl Default for MockLedgerConfig {
    fn default() -> Self {
        Self {
            chain_id: ChainId(1),
            block_interval: Duration::from_millis(10),
            submit_latency: Duration::ZERO,
            fail_every: None,
            rejected_senders: HashSet::new(),
        }
    }
}

impl MockLedgerConfig {
    /// Set the block interval.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    /// Set the submission latency.
    pub fn with_submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = latency;
        self
    }

    /// Reject every n-th submission.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Reject every transaction from `sender`.
    pub fn with_rejected_sender(mut self, sender: PublicKey) -> Self {
        self.rejected_senders.insert(sender);
        self
    }
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    mempool: Vec<Hash>,
    committed: HashMap<Hash, BlockHeight>,
    nonces: HashMap<Address, u64>,
    subscribers: Vec<mpsc::UnboundedSender<BlockEvent>>,
    waiters: HashMap<Hash, oneshot::Sender<BlockHeight>>,
}

/// In-process ledger for tests.
pub struct MockLedger {
    config: MockLedgerConfig,
    state: Mutex<LedgerState>,
    submissions: AtomicU64,
    rejections: AtomicU64,
    shutdown: CancellationToken,
}

impl MockLedger {
    /// Create a ledger without a block producer; blocks are sealed only by
    /// explicit [`produce_block`](Self::produce_block) calls.
    pub fn manual(config: MockLedgerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(LedgerState::default()),
            submissions: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// Create a ledger and spawn its block producer. Must be called inside a
    /// tokio runtime.
    pub fn start(config: MockLedgerConfig) -> Arc<Self> {
        let ledger = Self::manual(config);
        let producer = Arc::clone(&ledger);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(producer.config.block_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = producer.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        producer.produce_block();
                    }
                }
            }
            debug!("Mock block producer stopped");
        });
        ledger
    }

    /// Stop the block producer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Seal the mempool into a block and publish it.
    pub fn produce_block(&self) -> BlockEvent {
        let mut state = self.state.lock();
        let txs = std::mem::take(&mut state.mempool);
        Self::publish(&mut state, txs)
    }

    /// Publish a block with arbitrary contents, bypassing the mempool.
    pub fn inject_block(&self, transactions: Vec<Hash>) -> BlockEvent {
        let mut state = self.state.lock();
        Self::publish(&mut state, transactions)
    }

    fn publish(state: &mut LedgerState, transactions: Vec<Hash>) -> BlockEvent {
        state.height += 1;
        let height = BlockHeight(state.height);
        for hash in &transactions {
            state.committed.entry(*hash).or_insert(height);
            if let Some(waiter) = state.waiters.remove(hash) {
                let _ = waiter.send(height);
            }
        }
        let block = BlockEvent::new(height, transactions);
        state
            .subscribers
            .retain(|subscriber| subscriber.send(block.clone()).is_ok());
        trace!(height = height.0, txs = block.len(), "Mock block sealed");
        block
    }

    /// Close every open block subscription.
    pub fn close_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Total `submit` calls, including rejected ones.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Rejected submissions.
    pub fn rejection_count(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Distinct transactions included in blocks.
    pub fn committed_count(&self) -> usize {
        self.state.lock().committed.len()
    }

    /// Whether `hash` has been included in a block.
    pub fn is_committed(&self, hash: &Hash) -> bool {
        self.state.lock().committed.contains_key(hash)
    }

    /// Latest sealed height.
    pub fn height(&self) -> BlockHeight {
        BlockHeight(self.state.lock().height)
    }

    /// Set the next expected nonce of `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    /// Validate and enqueue a transaction, optionally registering an
    /// inclusion waiter under the same lock.
    async fn accept(
        &self,
        tx: &SignedTransaction,
        waiter: Option<oneshot::Sender<BlockHeight>>,
    ) -> Result<Hash, ClientError> {
        if !self.config.submit_latency.is_zero() {
            tokio::time::sleep(self.config.submit_latency).await;
        }
        let n = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;

        let reason = if self.config.fail_every.is_some_and(|every| n % every == 0) {
            Some("injected failure")
        } else if self
            .config
            .rejected_senders
            .contains(&tx.transaction().sender)
        {
            Some("sender rejected")
        } else if !tx.verify() {
            Some("invalid signature")
        } else {
            None
        };
        if let Some(reason) = reason {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return Err(ClientError::Rejected(reason.to_string()));
        }

        let hash = tx.hash();
        let sender = Address::from_public_key(&tx.transaction().sender);
        let mut state = self.state.lock();
        let next = state.nonces.entry(sender).or_insert(0);
        *next = (*next).max(tx.transaction().nonce + 1);
        if let Some(waiter) = waiter {
            state.waiters.insert(hash, waiter);
        }
        state.mempool.push(hash);
        Ok(hash)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(&self, tx: &SignedTransaction) -> Result<Hash, ClientError> {
        self.accept(tx, None).await
    }

    async fn submit_and_wait(&self, tx: &SignedTransaction) -> Result<Receipt, ClientError> {
        let (sender, receiver) = oneshot::channel();
        let hash = self.accept(tx, Some(sender)).await?;
        let height = receiver
            .await
            .map_err(|_| ClientError::SubscriptionClosed)?;
        Ok(Receipt {
            tx_hash: hash,
            block_height: height,
            success: true,
            error: None,
        })
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, ClientError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(sender);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn chain_metadata(&self) -> Result<ChainMetadata, ClientError> {
        let state = self.state.lock();
        Ok(ChainMetadata {
            chain_id: self.config.chain_id,
            height: BlockHeight(state.height),
            pending_transactions: state.mempool.len() as u64,
            version: "mock".to_string(),
        })
    }

    async fn account_nonce(&self, address: &Address) -> Result<u64, ClientError> {
        Ok(self.state.lock().nonces.get(address).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submitted_transaction_appears_in_next_block() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let mut blocks = ledger.subscribe_blocks().await.unwrap();
        let tx = test_transaction(1, 0);

        let hash = ledger.submit(&tx).await.unwrap();
        assert_eq!(hash, tx.hash());

        ledger.produce_block();
        let block = blocks.next().await.unwrap();
        assert_eq!(block.transactions, vec![hash]);
        assert!(ledger.is_committed(&hash));
    }

    #[tokio::test]
    async fn test_fail_every_rejects_periodically() {
        let ledger = MockLedger::manual(MockLedgerConfig::default().with_fail_every(2));
        assert!(ledger.submit(&test_transaction(1, 0)).await.is_ok());
        assert!(ledger.submit(&test_transaction(1, 1)).await.is_err());
        assert!(ledger.submit(&test_transaction(1, 2)).await.is_ok());
        assert_eq!(ledger.rejection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_wait_resolves_on_block() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let receipt = ledger
            .submit_and_wait(&test_transaction(2, 0))
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_height, BlockHeight(1));
        ledger.shutdown();
    }

    #[tokio::test]
    async fn test_nonce_tracks_highest_submission() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let tx = test_transaction(3, 4);
        ledger.submit(&tx).await.unwrap();
        let sender = Address::from_public_key(&tx.transaction().sender);
        assert_eq!(ledger.account_nonce(&sender).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_close_subscriptions_ends_stream() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let mut blocks = ledger.subscribe_blocks().await.unwrap();
        ledger.close_subscriptions();
        assert!(blocks.next().await.is_none());
    }
}
