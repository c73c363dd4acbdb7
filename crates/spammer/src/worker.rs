//! Rate-limited worker.
//!
//! A [`Worker`] fires once every `1 / rate` seconds until cancelled. Each
//! firing builds one transaction, registers its hash with the tracker and
//! hands the submission to the dispatcher as an independent task; the timer
//! loop never waits on the network. Cancellation stops the timer only:
//! submissions already dispatched run to completion.

use crate::accounts::Identity;
use crate::dispatcher::Dispatcher;
use crate::metrics::{MetricEvent, MetricsHandle};
use crate::tracker::ConfirmationTracker;
use crate::workloads::WorkloadGenerator;
use ledgerbench_client::LedgerClient;
use ledgerbench_types::TxKind;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

/// Final per-worker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub index: usize,
    pub rate: u64,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub throttled: u64,
}

#[derive(Default)]
struct WorkerCounters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    throttled: AtomicU64,
}

/// Shared collaborators every worker submits through.
#[derive(Clone)]
pub struct WorkerContext {
    pub client: Arc<dyn LedgerClient>,
    pub workload: Arc<dyn WorkloadGenerator>,
    pub tracker: ConfirmationTracker,
    pub dispatcher: Dispatcher,
    pub metrics: MetricsHandle,
}

/// Issues transactions for one identity at a fixed rate.
pub struct Worker {
    index: usize,
    rate: u64,
    identity: Arc<Identity>,
    ctx: WorkerContext,
    rng: ChaCha8Rng,
    state: WorkerState,
    counters: Arc<WorkerCounters>,
}

impl Worker {
    /// Create an idle worker. `seed` makes its workload reproducible.
    pub fn new(identity: Arc<Identity>, rate: u64, seed: u64, ctx: WorkerContext) -> Self {
        let index = identity.index();
        Self {
            index,
            rate,
            identity,
            ctx,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(index as u64)),
            state: WorkerState::Idle,
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn kind(&self) -> TxKind {
        self.ctx.workload.kind()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Interval between firings, `None` for a zero rate. Never shorter
    /// than one nanosecond.
    pub fn period(&self) -> Option<Duration> {
        (self.rate > 0).then(|| {
            Duration::from_secs_f64(1.0 / self.rate as f64).max(Duration::from_nanos(1))
        })
    }

    /// Fire until `cancel` is triggered.
    ///
    /// A zero-rate worker stops immediately without firing.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let Some(period) = self.period() else {
            debug!(worker = self.index, "Zero rate, worker not started");
            self.state = WorkerState::Stopped;
            return;
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        self.state = WorkerState::Running;
        debug!(worker = self.index, rate = self.rate, kind = %self.kind(), "Worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.fire(),
            }
        }

        self.state = WorkerState::Stopped;
        debug!(worker = self.index, stats = ?self.stats(), "Worker stopped");
    }

    /// One timer firing.
    fn fire(&mut self) {
        self.counters.attempted.fetch_add(1, Ordering::Relaxed);
        self.ctx.metrics.record(MetricEvent::Attempted);

        let permit = match self.ctx.dispatcher.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                self.ctx.metrics.record(MetricEvent::Throttled);
                trace!(worker = self.index, reason = %e, "Tick skipped");
                return;
            }
        };

        let tx = self.ctx.workload.generate_one(&self.identity, &mut self.rng);
        let hash = tx.hash();
        self.ctx.tracker.track(hash, Instant::now());

        let ctx = self.ctx.clone();
        let counters = Arc::clone(&self.counters);
        let worker = self.index;
        self.ctx.dispatcher.spawn(permit, async move {
            match ctx.client.submit(&tx).await {
                Ok(returned) => {
                    if returned != hash {
                        warn!(worker, expected = %hash, %returned, "Ledger reported a different hash");
                    }
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    ctx.metrics.record(MetricEvent::Submitted);
                }
                Err(e) => {
                    ctx.tracker.forget(&hash);
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    ctx.metrics.record(MetricEvent::Failed);
                    if e.is_transient() {
                        debug!(worker, %hash, error = %e, "Submission failed");
                    } else {
                        warn!(worker, %hash, error = %e, "Submission failed");
                    }
                }
            }
        });
    }

    /// Counters so far. Submissions still in flight are not yet reflected in
    /// `succeeded` / `failed`.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            index: self.index,
            rate: self.rate,
            attempted: self.counters.attempted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
        }
    }
}
