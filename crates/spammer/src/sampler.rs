//! Periodic throughput and latency sampling.

use crate::metrics::{MetricsHandle, WindowedCounters};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One sampler reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Time since the run started.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Confirmations since the run started.
    pub confirmed: u64,
    /// `confirmed / elapsed`.
    pub cumulative_tps: f64,
    /// Confirmations since the previous sample.
    pub window_confirmed: u64,
    /// `window_confirmed / time since the previous sample`.
    pub window_tps: f64,
    /// Largest single confirmation delay so far.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Mean confirmation delay so far.
    #[serde(with = "humantime_serde")]
    pub avg_delay: Duration,
}

impl Sample {
    /// Derive a sample from one windowed read.
    pub fn from_counters(counters: &WindowedCounters, elapsed: Duration, window: Duration) -> Self {
        Self {
            elapsed,
            confirmed: counters.totals.confirmed,
            cumulative_tps: rate(counters.totals.confirmed, elapsed),
            window_confirmed: counters.window.confirmed,
            window_tps: rate(counters.window.confirmed, window),
            max_delay: counters.totals.max_delay,
            avg_delay: counters.totals.avg_delay(),
        }
    }
}

/// Events per second over `elapsed`, zero for an empty interval.
pub fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Reads the run counters every `interval` and logs a [`Sample`].
pub struct Sampler {
    metrics: MetricsHandle,
    interval: Duration,
}

impl Sampler {
    pub fn new(metrics: MetricsHandle, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    /// Sample until `cancel` fires. `started` is the run start.
    ///
    /// The only counter mutation performed is the window reset that is part
    /// of each read.
    pub async fn run(self, started: Instant, cancel: CancellationToken) -> Vec<Sample> {
        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut samples = Vec::new();
        let mut last = started;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let counters = match self.metrics.take_window().await {
                        Ok(counters) => counters,
                        Err(e) => {
                            warn!(error = %e, "Sampler stopped");
                            break;
                        }
                    };
                    let sample = Sample::from_counters(&counters, now - started, now - last);
                    last = now;

                    info!(
                        elapsed = ?sample.elapsed,
                        confirmed = sample.confirmed,
                        cumulative_tps = %format!("{:.1}", sample.cumulative_tps),
                        window_tps = %format!("{:.1}", sample.window_tps),
                        max_delay = ?sample.max_delay,
                        avg_delay = ?sample.avg_delay,
                        "Throughput sample"
                    );
                    samples.push(sample);
                }
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricEvent, MetricsCollector};

    fn confirm(metrics: &MetricsHandle, n: u64, delay_ms: u64) {
        for _ in 0..n {
            metrics.record(MetricEvent::Confirmed {
                delay: Duration::from_millis(delay_ms),
            });
        }
    }

    #[test]
    fn test_rate_of_empty_interval_is_zero() {
        assert_eq!(rate(10, Duration::ZERO), 0.0);
        assert_eq!(rate(10, Duration::from_secs(2)), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_never_double_count() {
        let (metrics, _task) = MetricsCollector::spawn().unwrap();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let sampler = tokio::spawn(
            Sampler::new(metrics.clone(), Duration::from_secs(1)).run(started, cancel.clone()),
        );

        // 10 confirmations in the first second, 30 in the second, none in the third.
        confirm(&metrics, 10, 20);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        confirm(&metrics, 30, 80);
        tokio::time::sleep(Duration::from_millis(1600)).await;
        cancel.cancel();

        let samples = sampler.await.unwrap();
        assert_eq!(samples.len(), 3);
        let windows: Vec<u64> = samples.iter().map(|s| s.window_confirmed).collect();
        assert_eq!(windows, vec![10, 30, 0]);
        assert_eq!(windows.iter().sum::<u64>(), samples[2].confirmed);

        assert_eq!(samples[1].window_tps, 30.0);
        assert_eq!(samples[1].cumulative_tps, 20.0);
        assert_eq!(samples[2].max_delay, Duration::from_millis(80));
        assert_eq!(samples[2].avg_delay, Duration::from_millis(65));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick_yields_nothing() {
        let (metrics, _task) = MetricsCollector::spawn().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let samples = Sampler::new(metrics, Duration::from_secs(1))
            .run(Instant::now(), cancel)
            .await;
        assert!(samples.is_empty());
    }
}
