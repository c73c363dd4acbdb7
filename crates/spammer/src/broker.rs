//! Worker pool orchestration.
//!
//! The [`Broker`] owns one benchmark run:
//!
//! 1. derive one identity per worker and sync their nonces
//! 2. run workload setup, dropping identities that fail it
//! 3. subscribe to blocks and start the confirmation tracker
//! 4. start every worker plus the sampler
//! 5. stop after the configured duration or on external cancellation
//! 6. drain in-flight submissions, freeze the counters, build the report

use crate::accounts::IdentityPool;
use crate::config::{BenchmarkConfig, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::metrics::{MetricsCollector, MetricsError};
use crate::report::BenchmarkReport;
use crate::sampler::Sampler;
use crate::setup;
use crate::tracker::{ConfirmationTracker, TrackerConfig};
use crate::worker::{Worker, WorkerContext};
use crate::workloads::{workload_for, RecipientSelection, TransferWorkload, WorkloadGenerator};
use futures::future::join_all;
use ledgerbench_client::{ClientError, LedgerClient};
use ledgerbench_types::{BlockHeight, TxKind};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that abort a run before it starts.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("Failed to subscribe to blocks: {0}")]
    Subscribe(#[source] ClientError),
}

/// Runs a pool of rate-limited workers against one ledger.
pub struct Broker {
    config: BenchmarkConfig,
    client: Arc<dyn LedgerClient>,
}

impl Broker {
    /// Create a broker. The configuration is validated and then fixed for
    /// the lifetime of the run.
    pub fn new(config: BenchmarkConfig, client: Arc<dyn LedgerClient>) -> Result<Self, BrokerError> {
        config.validate()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run for the configured duration.
    pub async fn run(self) -> Result<BenchmarkReport, BrokerError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Run for the configured duration or until `cancel` fires, whichever
    /// comes first.
    pub async fn run_until(self, cancel: CancellationToken) -> Result<BenchmarkReport, BrokerError> {
        let config = &self.config;
        info!(
            workers = config.workers,
            target_tps = config.target_tps,
            duration = ?config.duration,
            kind = %config.tx_kind,
            "Starting benchmark"
        );

        let mut report = BenchmarkReport::empty(config.tx_kind, config.target_tps, config.workers);
        if config.workers == 0 || config.target_tps == 0 {
            info!("No workers or zero target rate, nothing to run");
            return Ok(report);
        }

        let pool = IdentityPool::generate(config.workers, config.key_seed);
        if let Err(e) = pool.sync_nonces(self.client.as_ref()).await {
            warn!(error = %e, "Failed to sync nonces, starting from zero");
        }
        let recipients: Vec<_> = pool.identities().iter().map(|i| i.address()).collect();
        let workload: Arc<dyn WorkloadGenerator> = match (config.tx_kind, config.zipf_exponent) {
            (TxKind::Transfer, Some(exponent)) => Arc::new(
                TransferWorkload::new(recipients)
                    .with_selection(RecipientSelection::Zipf { exponent }),
            ),
            (kind, _) => workload_for(kind, recipients, config.target_chain),
        };

        let identities = if config.tx_kind.needs_setup() {
            setup::prepare_all(
                self.client.as_ref(),
                workload.as_ref(),
                pool.identities().to_vec(),
                config.confirmation_timeout,
            )
            .await
        } else {
            pool.identities().to_vec()
        };
        report.dropped_workers = pool.len() - identities.len();
        if identities.is_empty() {
            warn!("No worker survived setup");
            return Ok(report);
        }

        let (metrics, _metrics_task) = MetricsCollector::spawn()?;
        let tracker = ConfirmationTracker::new(
            TrackerConfig {
                recent_cache_size: config.recent_cache_size,
                pending_ttl: config.pending_ttl,
                sweep_interval: config.sample_interval,
            },
            metrics.clone(),
        );
        let blocks = self
            .client
            .subscribe_blocks()
            .await
            .map_err(BrokerError::Subscribe)?;
        let tracker_cancel = CancellationToken::new();
        let tracker_task = tokio::spawn(tracker.clone().run(blocks, tracker_cancel.clone()));

        report.start_height = self.chain_height().await;

        let dispatcher = Dispatcher::new(config.max_in_flight);
        let ctx = WorkerContext {
            client: Arc::clone(&self.client),
            workload,
            tracker: tracker.clone(),
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
        };

        let stop = cancel.child_token();
        let started = Instant::now();
        let worker_tasks: Vec<_> = identities
            .into_iter()
            .map(|identity| {
                let rate = config.rate_for_worker(identity.index());
                let mut worker = Worker::new(identity, rate, config.seed, ctx.clone());
                let worker_cancel = stop.child_token();
                tokio::spawn(async move {
                    worker.run(worker_cancel).await;
                    worker
                })
            })
            .collect();
        let sampler_task = tokio::spawn(
            Sampler::new(metrics.clone(), config.sample_interval).run(started, stop.clone()),
        );
        info!(workers = worker_tasks.len(), "Workers started");

        tokio::select! {
            _ = tokio::time::sleep(config.duration) => info!("Run duration elapsed"),
            _ = cancel.cancelled() => info!("Run cancelled"),
        }
        stop.cancel();
        report.elapsed = started.elapsed();

        let mut workers = Vec::with_capacity(worker_tasks.len());
        for result in join_all(worker_tasks).await {
            match result {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    report.failed_workers += 1;
                    warn!(error = %e, "Worker task failed");
                }
            }
        }
        report.drained = dispatcher.drain(config.drain_timeout).await;
        report.worker_stats = workers.iter().map(Worker::stats).collect();

        tracker_cancel.cancel();
        if let Err(e) = tracker_task.await {
            warn!(error = %e, "Tracker task failed");
        }
        report.samples = sampler_task.await.unwrap_or_else(|e| {
            warn!(error = %e, "Sampler task failed");
            Vec::new()
        });

        report.counters = metrics.freeze().await?;
        report.end_height = self.chain_height().await;

        let report = report.with_achieved_tps();
        info!(
            confirmed = report.counters.confirmed,
            elapsed = ?report.elapsed,
            achieved_tps = %format!("{:.2}", report.achieved_tps),
            "Benchmark finished"
        );
        Ok(report)
    }

    async fn chain_height(&self) -> Option<BlockHeight> {
        match self.client.chain_metadata().await {
            Ok(metadata) => Some(metadata.height),
            Err(e) => {
                warn!(error = %e, "Failed to read chain metadata");
                None
            }
        }
    }
}
