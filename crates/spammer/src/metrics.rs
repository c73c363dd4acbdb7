//! Global run counters.
//!
//! A single [`MetricsCollector`] task owns every counter and the latency
//! histogram. Everyone else holds a cloneable [`MetricsHandle`] that sends
//! events over an unbounded queue; reads are request/response over oneshot
//! channels, so a windowed read-and-reset is one indivisible step.

use hdrhistogram::{CreationError, Histogram};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Highest latency the histogram resolves, in microseconds (one hour).
const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;

/// Something that happened to one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    /// A worker tick fired.
    Attempted,
    /// The ledger accepted a submission.
    Submitted,
    /// A submission failed.
    Failed,
    /// A tick was skipped because the dispatcher was full.
    Throttled,
    /// A tracked transaction appeared in a block.
    Confirmed { delay: Duration },
    /// A tracked transaction was dropped unconfirmed after its TTL.
    Expired,
}

/// Point-in-time copy of the cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub attempted: u64,
    pub submitted: u64,
    pub failed: u64,
    pub throttled: u64,
    pub confirmed: u64,
    pub expired: u64,
    #[serde(with = "humantime_serde")]
    pub total_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub p50_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub p90_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub p99_delay: Duration,
}

impl CounterSnapshot {
    /// Mean confirmation delay, zero when nothing confirmed.
    pub fn avg_delay(&self) -> Duration {
        if self.confirmed == 0 {
            return Duration::ZERO;
        }
        self.total_delay / self.confirmed.min(u32::MAX as u64) as u32
    }
}

/// Confirmations counted since the previous window was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowSample {
    pub confirmed: u64,
    pub total_delay: Duration,
    pub max_delay: Duration,
}

/// Cumulative totals and the window that was just closed, read together.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowedCounters {
    pub totals: CounterSnapshot,
    pub window: WindowSample,
}

/// Errors talking to the metrics owner.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to create latency histogram: {0}")]
    Histogram(#[from] CreationError),

    #[error("Metrics collector stopped")]
    Closed,
}

enum Command {
    Record(MetricEvent),
    Snapshot(oneshot::Sender<CounterSnapshot>),
    TakeWindow(oneshot::Sender<WindowedCounters>),
    Freeze(oneshot::Sender<CounterSnapshot>),
}

/// Owner of the run counters. Lives inside its own task.
pub struct MetricsCollector {
    totals: CounterSnapshot,
    window: WindowSample,
    latency_us: Histogram<u64>,
    frozen: bool,
}

impl MetricsCollector {
    /// Create zeroed counters.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            totals: CounterSnapshot::default(),
            window: WindowSample::default(),
            latency_us: Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)?,
            frozen: false,
        })
    }

    /// Spawn the owner task and return a handle to it.
    ///
    /// The task exits once every handle has been dropped.
    pub fn spawn() -> Result<(MetricsHandle, JoinHandle<()>), MetricsError> {
        let collector = Self::new()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(collector.run(rx));
        Ok((MetricsHandle { tx }, task))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Record(event) => self.apply(event),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::TakeWindow(reply) => {
                    let window = std::mem::take(&mut self.window);
                    let _ = reply.send(WindowedCounters {
                        totals: self.snapshot(),
                        window,
                    });
                }
                Command::Freeze(reply) => {
                    self.frozen = true;
                    debug!(confirmed = self.totals.confirmed, "Counters frozen");
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        trace!("Metrics collector stopped");
    }

    fn apply(&mut self, event: MetricEvent) {
        if self.frozen {
            return;
        }
        let totals = &mut self.totals;
        match event {
            MetricEvent::Attempted => totals.attempted += 1,
            MetricEvent::Submitted => totals.submitted += 1,
            MetricEvent::Failed => totals.failed += 1,
            MetricEvent::Throttled => totals.throttled += 1,
            MetricEvent::Expired => totals.expired += 1,
            MetricEvent::Confirmed { delay } => {
                totals.confirmed += 1;
                totals.total_delay += delay;
                totals.max_delay = totals.max_delay.max(delay);

                self.window.confirmed += 1;
                self.window.total_delay += delay;
                self.window.max_delay = self.window.max_delay.max(delay);

                let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
                self.latency_us.saturating_record(micros.max(1));
            }
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        let quantile = |q: f64| {
            if self.latency_us.len() == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(self.latency_us.value_at_quantile(q))
            }
        };
        CounterSnapshot {
            p50_delay: quantile(0.50),
            p90_delay: quantile(0.90),
            p99_delay: quantile(0.99),
            ..self.totals
        }
    }
}

/// Cloneable sender side of the metrics owner.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl MetricsHandle {
    /// Record an event. Events sent after the collector stopped are lost.
    pub fn record(&self, event: MetricEvent) {
        let _ = self.tx.send(Command::Record(event));
    }

    /// Current cumulative counters.
    pub async fn snapshot(&self) -> Result<CounterSnapshot, MetricsError> {
        self.request(Command::Snapshot).await
    }

    /// Cumulative counters plus the window since the last call; the window
    /// is reset in the same step.
    pub async fn take_window(&self) -> Result<WindowedCounters, MetricsError> {
        self.request(Command::TakeWindow).await
    }

    /// Stop counting and return the final values. Later events are ignored.
    pub async fn freeze(&self) -> Result<CounterSnapshot, MetricsError> {
        self.request(Command::Freeze).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MetricsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| MetricsError::Closed)?;
        reply_rx.await.map_err(|_| MetricsError::Closed)
    }
}
