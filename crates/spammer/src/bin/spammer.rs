//! Ledger benchmark CLI
//!
//! A command-line tool for driving rate-limited transaction load against a
//! ledger endpoint and reporting achieved throughput and confirmation delay.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ledgerbench_client::{HttpClientConfig, HttpLedgerClient};
use ledgerbench_spammer::genesis::generate_funding_toml;
use ledgerbench_spammer::{BenchmarkConfig, Broker};
use ledgerbench_types::TxKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledgerbench-spammer")]
#[command(about = "Transaction throughput benchmark for ledger endpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate funding configuration for the benchmark identities
    Fund {
        /// Number of identities
        #[arg(long, default_value = "10")]
        workers: usize,

        /// Seed the identities are derived from
        #[arg(long, default_value = "100")]
        key_seed: u64,

        /// Initial balance per identity
        #[arg(long, default_value = "1000000")]
        balance: u64,
    },

    /// Run a benchmark against a ledger endpoint
    Run {
        /// TOML configuration file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ledger endpoint
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Aggregate target transactions per second
        #[arg(long)]
        tps: Option<u64>,

        /// Duration to run (e.g., "30s", "5m", "1h")
        #[arg(short, long)]
        duration: Option<humantime::Duration>,

        /// Transaction kind (transfer, invoke, cross-chain)
        #[arg(short, long)]
        kind: Option<TxKind>,

        /// Seed the signing identities are derived from
        #[arg(long)]
        key_seed: Option<u64>,

        /// Maximum submissions in flight
        #[arg(long)]
        max_in_flight: Option<usize>,

        /// Zipf exponent for transfer recipients (uniform when omitted)
        #[arg(long)]
        zipf: Option<f64>,

        /// Timeout for setup confirmations
        #[arg(long)]
        confirm_timeout: Option<humantime::Duration>,

        /// Wait for the endpoint to be ready before starting
        #[arg(long)]
        wait_ready: bool,

        /// Also print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

struct RunArgs {
    config: Option<PathBuf>,
    endpoint: Option<String>,
    workers: Option<usize>,
    tps: Option<u64>,
    duration: Option<humantime::Duration>,
    kind: Option<TxKind>,
    key_seed: Option<u64>,
    max_in_flight: Option<usize>,
    zipf: Option<f64>,
    confirm_timeout: Option<humantime::Duration>,
}

fn build_config(args: RunArgs) -> anyhow::Result<BenchmarkConfig> {
    let mut config = match &args.config {
        Some(path) => BenchmarkConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BenchmarkConfig::default(),
    };

    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(tps) = args.tps {
        config = config.with_target_tps(tps);
    }
    if let Some(duration) = args.duration {
        config = config.with_duration(*duration);
    }
    if let Some(kind) = args.kind {
        config = config.with_tx_kind(kind);
    }
    if let Some(seed) = args.key_seed {
        config = config.with_key_seed(seed);
    }
    if let Some(max) = args.max_in_flight {
        config = config.with_max_in_flight(max);
    }
    if let Some(exponent) = args.zipf {
        config = config.with_zipf_exponent(exponent);
    }
    if let Some(timeout) = args.confirm_timeout {
        config = config.with_confirmation_timeout(*timeout);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fund {
            workers,
            key_seed,
            balance,
        } => {
            // Don't initialize tracing for funding - output goes to stdout
            print!("{}", generate_funding_toml(workers, key_seed, balance));
        }

        Commands::Run {
            config,
            endpoint,
            workers,
            tps,
            duration,
            kind,
            key_seed,
            max_in_flight,
            zipf,
            confirm_timeout,
            wait_ready,
            json,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            let config = build_config(RunArgs {
                config,
                endpoint,
                workers,
                tps,
                duration,
                kind,
                key_seed,
                max_in_flight,
                zipf,
                confirm_timeout,
            })?;

            let client = HttpLedgerClient::new(HttpClientConfig::new(config.endpoint.clone()))
                .context("building HTTP client")?;

            if wait_ready {
                info!(endpoint = %config.endpoint, "Waiting for ledger to be ready");
                let metadata = client
                    .wait_for_ready(Duration::from_secs(60))
                    .await
                    .context("ledger did not become ready")?;
                info!(chain = %metadata.chain_id, height = %metadata.height, "Ledger ready");
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping run");
                    on_signal.cancel();
                }
            });

            let broker = Broker::new(config, Arc::new(client))?;
            let report = broker.run_until(cancel).await?;
            report.print();
            if json {
                println!("{}", report.to_json()?);
            }
        }
    }

    Ok(())
}
