//! Ledger throughput and latency benchmarking.
//!
//! A pool of rate-limited workers issues signed transactions at a fixed
//! aggregate rate, a tracker correlates each submission with the block that
//! includes it, and a sampler reports throughput and confirmation delay.
//!
//! # Architecture
//!
//! ```text
//! Broker ──spawns──► Worker × N ──try_acquire──► Dispatcher ──► LedgerClient::submit
//!    │                  │ track(hash)                               │
//!    │                  ▼                                           ▼
//!    │          ConfirmationTracker ◄───────── block stream ─── ledger
//!    │                  │ Confirmed { delay }
//!    ▼                  ▼
//! Sampler ◄─take_window── MetricsCollector (owner task)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ledgerbench_client::HttpLedgerClient;
//! use ledgerbench_spammer::{BenchmarkConfig, Broker};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = BenchmarkConfig::new("http://127.0.0.1:8080")
//!     .with_workers(10)
//!     .with_target_tps(50)
//!     .with_duration(Duration::from_secs(30));
//!
//! let client = Arc::new(HttpLedgerClient::connect(&config.endpoint)?);
//! let report = Broker::new(config, client)?.run().await?;
//! report.print();
//! ```

pub mod accounts;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod genesis;
pub mod metrics;
pub mod report;
pub mod sampler;
pub mod setup;
pub mod tracker;
pub mod worker;
pub mod workloads;

pub use accounts::{Identity, IdentityPool, SelectionMode};
pub use broker::{Broker, BrokerError};
pub use config::{BenchmarkConfig, ConfigError};
pub use dispatcher::{DispatchError, DispatchPermit, Dispatcher};
pub use metrics::{CounterSnapshot, MetricEvent, MetricsCollector, MetricsError, MetricsHandle};
pub use report::BenchmarkReport;
pub use sampler::{Sample, Sampler};
pub use setup::SetupError;
pub use tracker::{
    Confirmation, ConfirmationTracker, PendingConfirmation, TrackerConfig, TrackerError,
};
pub use worker::{Worker, WorkerContext, WorkerState, WorkerStats};
pub use workloads::{workload_for, WorkloadGenerator};
