//! End-of-run report.

use crate::metrics::CounterSnapshot;
use crate::sampler::{rate, Sample};
use crate::worker::WorkerStats;
use ledgerbench_types::{BlockHeight, TxKind};
use serde::Serialize;
use std::time::Duration;

/// Results of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub tx_kind: TxKind,
    pub target_tps: u64,
    /// Workers configured.
    pub workers: usize,
    /// Workers dropped because their setup failed.
    pub dropped_workers: usize,
    /// Worker tasks that ended abnormally (panicked) during the run.
    pub failed_workers: usize,
    /// Actual run time, from start until stop.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Final counter values.
    pub counters: CounterSnapshot,
    /// `confirmed / elapsed`.
    pub achieved_tps: f64,
    /// Whether every in-flight submission finished before the drain timeout.
    pub drained: bool,
    pub start_height: Option<BlockHeight>,
    pub end_height: Option<BlockHeight>,
    pub worker_stats: Vec<WorkerStats>,
    pub samples: Vec<Sample>,
}

impl BenchmarkReport {
    /// A report for a run that never started any worker.
    pub fn empty(tx_kind: TxKind, target_tps: u64, workers: usize) -> Self {
        Self {
            tx_kind,
            target_tps,
            workers,
            dropped_workers: 0,
            failed_workers: 0,
            elapsed: Duration::ZERO,
            counters: CounterSnapshot::default(),
            achieved_tps: 0.0,
            drained: true,
            start_height: None,
            end_height: None,
            worker_stats: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Recompute `achieved_tps` from the counters and elapsed time.
    pub fn with_achieved_tps(mut self) -> Self {
        self.achieved_tps = rate(self.counters.confirmed, self.elapsed);
        self
    }

    /// Blocks produced during the run, when both heights are known.
    pub fn blocks_produced(&self) -> Option<u64> {
        Some(self.end_height?.blocks_since(self.start_height?))
    }

    /// Share of attempts that were confirmed.
    pub fn confirmation_ratio(&self) -> f64 {
        if self.counters.attempted == 0 {
            return 0.0;
        }
        self.counters.confirmed as f64 / self.counters.attempted as f64
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        let c = &self.counters;
        println!();
        println!("=== Benchmark Report ===");
        println!("Kind:            {}", self.tx_kind);
        println!(
            "Workers:         {} ({} dropped in setup)",
            self.workers, self.dropped_workers
        );
        println!("Duration:        {:.2?}", self.elapsed);
        println!("Target TPS:      {}", self.target_tps);
        println!("Achieved TPS:    {:.2}", self.achieved_tps);
        println!();
        println!("Attempted:       {}", c.attempted);
        println!("Submitted:       {}", c.submitted);
        println!("Failed:          {}", c.failed);
        println!("Throttled:       {}", c.throttled);
        println!(
            "Confirmed:       {} ({:.1}%)",
            c.confirmed,
            self.confirmation_ratio() * 100.0
        );
        println!("Expired:         {}", c.expired);
        println!();
        println!("Avg delay:       {:.2?}", c.avg_delay());
        println!("P50 delay:       {:.2?}", c.p50_delay);
        println!("P90 delay:       {:.2?}", c.p90_delay);
        println!("P99 delay:       {:.2?}", c.p99_delay);
        println!("Max delay:       {:.2?}", c.max_delay);
        if let Some(blocks) = self.blocks_produced() {
            println!();
            println!("Blocks produced: {}", blocks);
        }
        if self.failed_workers > 0 {
            println!();
            println!("Warning: {} worker(s) failed during the run", self.failed_workers);
        }
        if !self.drained {
            println!();
            println!("Warning: some submissions were still in flight at shutdown");
        }
        println!("========================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BenchmarkReport {
        let mut report = BenchmarkReport::empty(TxKind::Transfer, 50, 10);
        report.elapsed = Duration::from_secs(2);
        report.counters.attempted = 100;
        report.counters.confirmed = 80;
        report.with_achieved_tps()
    }

    #[test]
    fn test_achieved_tps_uses_elapsed() {
        let report = report();
        assert_eq!(report.achieved_tps, 40.0);
        assert_eq!(report.confirmation_ratio(), 0.8);
    }

    #[test]
    fn test_empty_report() {
        let report = BenchmarkReport::empty(TxKind::Invoke, 0, 0).with_achieved_tps();
        assert_eq!(report.achieved_tps, 0.0);
        assert_eq!(report.confirmation_ratio(), 0.0);
        assert_eq!(report.blocks_produced(), None);
    }

    #[test]
    fn test_blocks_produced() {
        let mut report = report();
        report.start_height = Some(BlockHeight(10));
        report.end_height = Some(BlockHeight(35));
        assert_eq!(report.blocks_produced(), Some(25));
    }

    #[test]
    fn test_json_contains_headline_figures() {
        let json = report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["achieved_tps"], 40.0);
        assert_eq!(value["counters"]["confirmed"], 80);
        assert_eq!(value["tx_kind"], "transfer");
        assert_eq!(value["elapsed"], "2s");
    }
}
