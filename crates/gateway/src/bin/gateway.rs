//! Ledger gateway server
//!
//! Serves `POST /submit` and `GET /health` in front of a ledger endpoint.

use anyhow::Context;
use clap::Parser;
use ledgerbench_client::{HttpClientConfig, HttpLedgerClient};
use ledgerbench_gateway::{Gateway, GatewayConfig};
use ledgerbench_types::TxKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledgerbench-gateway")]
#[command(about = "HTTP gateway that submits transactions and waits for confirmation")]
#[command(version)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Ledger endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Number of signing identities
    #[arg(long)]
    identities: Option<usize>,

    /// Seed the identities are derived from
    #[arg(long)]
    key_seed: Option<u64>,

    /// Enabled transaction kinds, comma separated
    #[arg(long, value_delimiter = ',')]
    kinds: Option<Vec<TxKind>>,

    /// How long a request waits for its confirmation (e.g., "30s")
    #[arg(long)]
    confirm_timeout: Option<humantime::Duration>,

    /// Maximum submissions in flight
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Wait for the endpoint to be ready before starting
    #[arg(long)]
    wait_ready: bool,
}

fn build_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(addr) = cli.listen {
        config = config.with_listen_addr(addr);
    }
    if let Some(endpoint) = &cli.endpoint {
        config = config.with_endpoint(endpoint.clone());
    }
    if let Some(identities) = cli.identities {
        config = config.with_identities(identities);
    }
    if let Some(seed) = cli.key_seed {
        config = config.with_key_seed(seed);
    }
    if let Some(kinds) = &cli.kinds {
        config = config.with_enabled_kinds(kinds.clone());
    }
    if let Some(timeout) = cli.confirm_timeout {
        config = config.with_confirmation_timeout(*timeout);
    }
    if let Some(max) = cli.max_in_flight {
        config = config.with_max_in_flight(max);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(&cli)?;
    let client = HttpLedgerClient::new(HttpClientConfig::new(config.endpoint.clone()))
        .context("building HTTP client")?;

    if cli.wait_ready {
        info!(endpoint = %config.endpoint, "Waiting for ledger to be ready");
        client
            .wait_for_ready(Duration::from_secs(60))
            .await
            .context("ledger did not become ready")?;
    }

    let gateway = Gateway::start(config, Arc::new(client))
        .await
        .context("starting gateway")?;
    gateway
        .listen(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gateway");
        })
        .await?;

    Ok(())
}
