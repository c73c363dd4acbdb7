//! Confirmation tracking.
//!
//! The [`ConfirmationTracker`] consumes the ledger's block stream and matches
//! every included transaction hash against the pending entries registered
//! by workers and request handlers.
//!
//! # Registration
//!
//! - [`track`](ConfirmationTracker::track) registers a counted-only entry:
//!   its confirmation feeds the run counters and nothing waits on it.
//! - [`register`](ConfirmationTracker::register) additionally returns a
//!   [`PendingConfirmation`] the caller can await with a timeout.
//!
//! Both should be called before the transaction is submitted. A hash seen in
//! a block with no entry is remembered in a bounded recent-confirmation
//! cache; a registration that finds its hash there resolves immediately.
//! Lookup and insertion happen under the map's per-key lock, so a block and
//! a registration for the same hash can never miss each other. With a cache
//! size of zero nothing is remembered and a late registration simply times
//! out.
//!
//! Each pending entry fires at most once and is removed when it fires.

use crate::metrics::{MetricEvent, MetricsHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use ledgerbench_client::BlockStream;
use ledgerbench_types::{BlockEvent, BlockHeight, Hash};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Hashes remembered after being seen without a pending entry.
    pub recent_cache_size: usize,
    /// Age after which counted-only entries are dropped.
    pub pending_ttl: Duration,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            recent_cache_size: 4096,
            pending_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// A matched transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub hash: Hash,
    pub block_height: BlockHeight,
    /// Time from registration to the block being observed.
    pub delay: Duration,
}

/// Errors from registration or waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Confirmation of {hash} not observed within {timeout:?}")]
    Timeout { hash: Hash, timeout: Duration },

    #[error("Pending confirmation of {0} was dropped")]
    Dropped(Hash),

    #[error("A waiter is already registered for {0}")]
    AlreadyPending(Hash),
}

enum Slot {
    Pending {
        submitted_at: Instant,
        waiter: Option<oneshot::Sender<Confirmation>>,
    },
    Confirmed {
        block_height: BlockHeight,
        observed_at: Instant,
        /// Identifies this cache insertion in `Inner::recent`.
        generation: u64,
    },
}

struct Inner {
    config: TrackerConfig,
    slots: DashMap<Hash, Slot>,
    /// Insertion order of cached `Confirmed` slots, oldest first.
    recent: Mutex<VecDeque<(Hash, u64)>>,
    next_generation: AtomicU64,
    metrics: MetricsHandle,
}

/// Matches block contents against registered transactions.
#[derive(Clone)]
pub struct ConfirmationTracker {
    inner: Arc<Inner>,
}

impl ConfirmationTracker {
    pub fn new(config: TrackerConfig, metrics: MetricsHandle) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slots: DashMap::new(),
                recent: Mutex::new(VecDeque::new()),
                next_generation: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Register a counted-only entry for `hash`.
    ///
    /// Returns `false` if the hash was already pending.
    pub fn track(&self, hash: Hash, submitted_at: Instant) -> bool {
        match self.inner.slots.entry(hash) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Pending {
                    submitted_at,
                    waiter: None,
                });
                true
            }
            Entry::Occupied(occupied) => {
                let observed_at = match occupied.get() {
                    Slot::Pending { .. } => return false,
                    Slot::Confirmed { observed_at, .. } => *observed_at,
                };
                occupied.remove();
                let delay = observed_at.saturating_duration_since(submitted_at);
                self.inner.metrics.record(MetricEvent::Confirmed { delay });
                true
            }
        }
    }

    /// Register a waiter for `hash`.
    ///
    /// If `hash` was recently observed the returned handle is already
    /// resolved.
    pub fn register(&self, hash: Hash) -> Result<PendingConfirmation, TrackerError> {
        let now = Instant::now();
        let (sender, receiver) = oneshot::channel();
        let mut sender = Some(sender);

        match self.inner.slots.entry(hash) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Pending {
                    submitted_at: now,
                    waiter: sender.take(),
                });
            }
            Entry::Occupied(mut occupied) => {
                let cached_height = match occupied.get_mut() {
                    Slot::Pending {
                        waiter: Some(_), ..
                    } => return Err(TrackerError::AlreadyPending(hash)),
                    Slot::Pending { waiter, .. } => {
                        *waiter = sender.take();
                        None
                    }
                    Slot::Confirmed { block_height, .. } => Some(*block_height),
                };
                if let Some(block_height) = cached_height {
                    occupied.remove();
                    self.inner.metrics.record(MetricEvent::Confirmed {
                        delay: Duration::ZERO,
                    });
                    if let Some(sender) = sender.take() {
                        let _ = sender.send(Confirmation {
                            hash,
                            block_height,
                            delay: Duration::ZERO,
                        });
                    }
                    trace!(%hash, "Registration matched recent confirmation");
                }
            }
        }

        Ok(PendingConfirmation {
            hash,
            receiver,
            tracker: self.clone(),
        })
    }

    /// Withdraw a pending entry, e.g. after its submission failed.
    pub fn forget(&self, hash: &Hash) -> bool {
        self.inner
            .slots
            .remove_if(hash, |_, slot| matches!(slot, Slot::Pending { .. }))
            .is_some()
    }

    /// Match every transaction of `block` against pending entries.
    ///
    /// Returns how many pending entries were fired.
    pub fn observe_block(&self, block: &BlockEvent) -> usize {
        let now = Instant::now();
        let mut matched = 0;
        let mut cached = Vec::new();

        for hash in &block.transactions {
            match self.inner.slots.entry(*hash) {
                Entry::Occupied(occupied) => {
                    if !matches!(occupied.get(), Slot::Pending { .. }) {
                        trace!(%hash, height = block.height.0, "Duplicate inclusion ignored");
                        continue;
                    }
                    if let Slot::Pending {
                        submitted_at,
                        waiter,
                    } = occupied.remove()
                    {
                        let delay = now.saturating_duration_since(submitted_at);
                        self.inner.metrics.record(MetricEvent::Confirmed { delay });
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(Confirmation {
                                hash: *hash,
                                block_height: block.height,
                                delay,
                            });
                        }
                        matched += 1;
                    }
                }
                Entry::Vacant(vacant) => {
                    if self.inner.config.recent_cache_size > 0 {
                        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                        vacant.insert(Slot::Confirmed {
                            block_height: block.height,
                            observed_at: now,
                            generation,
                        });
                        cached.push((*hash, generation));
                    } else {
                        trace!(%hash, "Unmatched transaction in block");
                    }
                }
            }
        }

        if !cached.is_empty() {
            self.remember(cached);
        }

        trace!(
            height = block.height.0,
            txs = block.len(),
            matched,
            "Observed block"
        );
        matched
    }

    fn remember(&self, entries: Vec<(Hash, u64)>) {
        let capacity = self.inner.config.recent_cache_size;
        let evicted: Vec<(Hash, u64)> = {
            let mut recent = self.inner.recent.lock();
            recent.extend(entries);
            let excess = recent.len().saturating_sub(capacity);
            recent.drain(..excess).collect()
        };
        // A hash consumed and cached again has a newer generation; only the
        // slot inserted together with the evicted queue entry is removed.
        for (hash, evicted_generation) in evicted {
            self.inner.slots.remove_if(&hash, |_, slot| {
                matches!(slot, Slot::Confirmed { generation, .. } if *generation == evicted_generation)
            });
        }
    }

    /// Drop counted-only entries older than the TTL and waiter entries whose
    /// handle is gone. Returns the number of expired counted-only entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.config.pending_ttl;
        let mut expired = 0;

        self.inner.slots.retain(|_, slot| match slot {
            Slot::Pending {
                waiter: None,
                submitted_at,
            } if now.saturating_duration_since(*submitted_at) >= ttl => {
                expired += 1;
                false
            }
            Slot::Pending {
                waiter: Some(waiter),
                ..
            } => !waiter.is_closed(),
            _ => true,
        });

        for _ in 0..expired {
            self.inner.metrics.record(MetricEvent::Expired);
        }
        if expired > 0 {
            debug!(expired, "Expired unconfirmed transactions");
        }
        expired
    }

    /// Entries still waiting for a block.
    pub fn pending_len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Pending { .. }))
            .count()
    }

    /// Consume `blocks` until it ends or `cancel` fires.
    ///
    /// Blocks are processed strictly in stream order. When the stream ends
    /// tracking stops; remaining waiters are left to their own timeouts.
    /// Returns the number of blocks observed.
    pub async fn run(self, mut blocks: BlockStream, cancel: CancellationToken) -> u64 {
        let mut sweep = tokio::time::interval(self.inner.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        let mut observed = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(observed, "Confirmation tracker cancelled");
                    break;
                }
                block = blocks.next() => match block {
                    Some(block) => {
                        self.observe_block(&block);
                        observed += 1;
                    }
                    None => {
                        info!(observed, pending = self.pending_len(), "Block stream closed, confirmation tracking stopped");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }
        observed
    }
}

/// Handle for one registered waiter.
pub struct PendingConfirmation {
    hash: Hash,
    receiver: oneshot::Receiver<Confirmation>,
    tracker: ConfirmationTracker,
}

impl PendingConfirmation {
    /// Hash being waited for.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Block until the hash is observed or `timeout` elapses.
    ///
    /// On timeout the pending entry is removed.
    pub async fn wait(self, timeout: Duration) -> Result<Confirmation, TrackerError> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_)) => Err(TrackerError::Dropped(self.hash)),
            Err(_) => {
                self.tracker.forget(&self.hash);
                Err(TrackerError::Timeout {
                    hash: self.hash,
                    timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use ledgerbench_test_helpers::test_hash;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn tracker(cache: usize) -> (ConfirmationTracker, MetricsHandle) {
        let (metrics, _task) = MetricsCollector::spawn().unwrap();
        let config = TrackerConfig {
            recent_cache_size: cache,
            pending_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
        };
        (ConfirmationTracker::new(config, metrics.clone()), metrics)
    }

    fn block(height: u64, hashes: &[Hash]) -> BlockEvent {
        BlockEvent::new(BlockHeight(height), hashes.to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_first_unblocks() {
        let (tracker, _metrics) = tracker(0);
        let hash = test_hash(1);
        let pending = tracker.register(hash).unwrap();

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(tracker.observe_block(&block(3, &[hash])), 1);

        let confirmation = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(confirmation.block_height, BlockHeight(3));
        assert_eq!(confirmation.delay, Duration::from_millis(40));
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_hash_fires_at_most_once() {
        let (tracker, metrics) = tracker(16);
        let hash = test_hash(1);
        tracker.track(hash, Instant::now());

        assert_eq!(tracker.observe_block(&block(1, &[hash])), 1);
        assert_eq!(tracker.observe_block(&block(2, &[hash])), 0);
        assert_eq!(tracker.observe_block(&block(3, &[hash, hash])), 0);

        assert_eq!(metrics.snapshot().await.unwrap().confirmed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_registration_without_cache_times_out() {
        let (tracker, _metrics) = tracker(0);
        let hash = test_hash(1);
        tracker.observe_block(&block(1, &[hash]));

        let pending = tracker.register(hash).unwrap();
        let err = pending.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, TrackerError::Timeout { .. }));
        assert_eq!(tracker.pending_len(), 0, "timed out waiter must be removed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_registration_with_cache_resolves() {
        let (tracker, metrics) = tracker(16);
        let hash = test_hash(1);
        tracker.observe_block(&block(5, &[hash]));

        let confirmation = tracker
            .register(hash)
            .unwrap()
            .wait(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(confirmation.block_height, BlockHeight(5));
        assert_eq!(metrics.snapshot().await.unwrap().confirmed, 1);

        // The cached entry was consumed.
        let again = tracker.register(hash).unwrap();
        assert!(again.wait(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_evicts_oldest() {
        let (tracker, _metrics) = tracker(2);
        let hashes = [test_hash(1), test_hash(2), test_hash(3)];
        tracker.observe_block(&block(1, &hashes));

        let oldest = tracker.register(hashes[0]).unwrap();
        assert!(oldest.wait(Duration::from_millis(10)).await.is_err());
        let newest = tracker.register(hashes[2]).unwrap();
        assert!(newest.wait(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recached_hash_survives_eviction_of_older_entry() {
        let (tracker, _metrics) = tracker(2);
        let hash = test_hash(1);

        tracker.observe_block(&block(1, &[hash]));
        tracker
            .register(hash)
            .unwrap()
            .wait(Duration::from_millis(10))
            .await
            .unwrap();

        // Seen again at the same instant, then pushed toward eviction: the
        // stale queue entry for the first sighting must not take the new slot.
        tracker.observe_block(&block(2, &[hash]));
        tracker.observe_block(&block(3, &[test_hash(2)]));

        let confirmation = tracker
            .register(hash)
            .unwrap()
            .wait(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(confirmation.block_height, BlockHeight(2));
    }

    #[tokio::test]
    async fn test_double_register_is_rejected() {
        let (tracker, _metrics) = tracker(0);
        let hash = test_hash(1);
        let _first = tracker.register(hash).unwrap();
        assert_eq!(
            tracker.register(hash).err(),
            Some(TrackerError::AlreadyPending(hash))
        );
    }

    #[tokio::test]
    async fn test_forget_withdraws_entry() {
        let (tracker, metrics) = tracker(0);
        let hash = test_hash(1);
        tracker.track(hash, Instant::now());
        assert!(tracker.forget(&hash));
        assert_eq!(tracker.observe_block(&block(1, &[hash])), 0);
        assert_eq!(metrics.snapshot().await.unwrap().confirmed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_counted_only_entries() {
        let (tracker, metrics) = tracker(0);
        tracker.track(test_hash(1), Instant::now());
        let waiter = tracker.register(test_hash(2)).unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(tracker.sweep(), 1);
        assert_eq!(tracker.pending_len(), 1, "live waiter is kept");

        drop(waiter);
        tracker.sweep();
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(metrics.snapshot().await.unwrap().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_close_releases_only_matched_waiter() {
        let (tracker, _metrics) = tracker(0);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = UnboundedReceiverStream::new(rx).boxed();

        let first = tracker.register(test_hash(1)).unwrap();
        let second = tracker.register(test_hash(2)).unwrap();
        let run = tokio::spawn(tracker.clone().run(stream, CancellationToken::new()));

        tx.send(block(1, &[test_hash(1)])).unwrap();
        drop(tx);
        assert_eq!(run.await.unwrap(), 1);

        assert!(first.wait(Duration::from_secs(1)).await.is_ok());
        let err = second.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TrackerError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (tracker, _metrics) = tracker(0);
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel::<BlockEvent>();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(
            tracker
                .clone()
                .run(UnboundedReceiverStream::new(rx).boxed(), cancel.clone()),
        );
        cancel.cancel();
        assert_eq!(run.await.unwrap(), 0);
    }
}
