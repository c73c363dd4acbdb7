//! Configuration for a benchmark run.

use ledgerbench_types::{ChainId, TxKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Highest per-worker rate a worker timer can represent (one tick per
/// nanosecond).
pub const MAX_WORKER_RATE: u64 = 1_000_000_000;

/// Configuration for one benchmark run.
///
/// Immutable once the run starts: the [`Broker`](crate::Broker) takes it by
/// value. Zero workers or a zero target rate is accepted and produces an
/// empty run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Ledger endpoint (base URL).
    pub endpoint: String,

    /// Number of concurrent workers.
    pub workers: usize,

    /// Aggregate target transactions per second across all workers.
    pub target_tps: u64,

    /// How long the timed run lasts.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Kind of transaction every worker sends.
    pub tx_kind: TxKind,

    /// Seed the worker signing identities are derived from.
    pub key_seed: u64,

    /// Seed for workload randomness (recipients, amounts).
    pub seed: u64,

    /// Chain targeted by cross-chain messages.
    pub target_chain: ChainId,

    /// Skew transfer recipients with this Zipf exponent instead of picking
    /// them uniformly.
    pub zipf_exponent: Option<f64>,

    /// Maximum submissions in flight at once across the whole pool.
    pub max_in_flight: usize,

    /// How long a synchronous waiter blocks before giving up.
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,

    /// How long an un-awaited pending confirmation is kept before expiring.
    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,

    /// Number of recently observed but unclaimed hashes remembered by the
    /// tracker. Zero disables the cache.
    pub recent_cache_size: usize,

    /// Period of the throughput sampler.
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Grace period for in-flight submissions after the run stops.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            workers: 10,
            target_tps: 100,
            duration: Duration::from_secs(60),
            tx_kind: TxKind::Transfer,
            key_seed: 100,
            seed: 12345,
            target_chain: ChainId(2),
            zipf_exponent: None,
            max_in_flight: 1024,
            confirmation_timeout: Duration::from_secs(30),
            pending_ttl: Duration::from_secs(60),
            recent_cache_size: 4096,
            sample_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl BenchmarkConfig {
    /// Create a configuration for `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_in_flight must be at least 1".into(),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sample_interval must be non-zero".into(),
            ));
        }
        let max_rate = self.rate_for_worker(0);
        if max_rate > MAX_WORKER_RATE {
            return Err(ConfigError::Invalid(format!(
                "per-worker rate {} exceeds {} tx/s, add workers",
                max_rate, MAX_WORKER_RATE
            )));
        }
        if let Some(exponent) = self.zipf_exponent {
            if !exponent.is_finite() || exponent < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "zipf_exponent must be a non-negative number, got {}",
                    exponent
                )));
            }
        }
        Ok(())
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the aggregate target TPS.
    pub fn with_target_tps(mut self, tps: u64) -> Self {
        self.target_tps = tps;
        self
    }

    /// Set the run duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the transaction kind.
    pub fn with_tx_kind(mut self, kind: TxKind) -> Self {
        self.tx_kind = kind;
        self
    }

    /// Set the identity seed.
    pub fn with_key_seed(mut self, seed: u64) -> Self {
        self.key_seed = seed;
        self
    }

    /// Set the workload seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the cross-chain target.
    pub fn with_target_chain(mut self, chain: ChainId) -> Self {
        self.target_chain = chain;
        self
    }

    /// Use Zipf-distributed transfer recipients.
    pub fn with_zipf_exponent(mut self, exponent: f64) -> Self {
        self.zipf_exponent = Some(exponent);
        self
    }

    /// Set the in-flight submission cap.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the synchronous confirmation timeout.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Set the pending-entry expiry.
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    /// Set the recent-confirmation cache size.
    pub fn with_recent_cache_size(mut self, size: usize) -> Self {
        self.recent_cache_size = size;
        self
    }

    /// Set the sampler period.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the post-run drain grace period.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Rate assigned to worker `index`.
    ///
    /// The aggregate is split evenly; the remainder of the integer division
    /// goes one extra transaction per second to each of the first workers,
    /// so the per-worker rates always sum to `target_tps`.
    pub fn rate_for_worker(&self, index: usize) -> u64 {
        if self.workers == 0 {
            return 0;
        }
        let workers = self.workers as u64;
        let base = self.target_tps / workers;
        let remainder = self.target_tps % workers;
        base + u64::from((index as u64) < remainder)
    }

    /// Rates for every worker, in index order.
    pub fn worker_rates(&self) -> Vec<u64> {
        (0..self.workers).map(|i| self.rate_for_worker(i)).collect()
    }
}

/// Errors loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
