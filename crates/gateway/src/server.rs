//! Request-facing HTTP server.
//!
//! Each `POST /submit` picks the next identity round-robin, signs one
//! transaction with that identity's next nonce, registers a waiter for its
//! hash, submits it and blocks until the tracker sees it in a block or the
//! confirmation timeout passes.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use ledgerbench_client::LedgerClient;
use ledgerbench_spammer::setup::prepare_all;
use ledgerbench_spammer::{
    workload_for, ConfirmationTracker, Dispatcher, IdentityPool, MetricEvent, MetricsCollector,
    MetricsHandle, TrackerConfig, WorkloadGenerator,
};
use ledgerbench_types::{BlockHeight, Hash, TxKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state of every request handler.
#[derive(Clone)]
pub struct GatewayState {
    client: Arc<dyn LedgerClient>,
    pool: Arc<IdentityPool>,
    workloads: Arc<HashMap<TxKind, Arc<dyn WorkloadGenerator>>>,
    tracker: ConfirmationTracker,
    dispatcher: Dispatcher,
    metrics: MetricsHandle,
    confirmation_timeout: Duration,
}

/// Query of `POST /submit`.
#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    pub kind: Option<String>,
}

/// Body of a successful `POST /submit`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub hash: Hash,
    pub block_height: BlockHeight,
    pub delay_ms: u64,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub identities: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub confirmed: u64,
}

/// A started gateway: identities prepared and block tracking running.
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Prepare identities, subscribe to blocks and start the tracker.
    ///
    /// Nonces are synced from the ledger. When cross-chain requests are
    /// enabled every identity runs its setup first; identities that fail it
    /// are excluded.
    pub async fn start(
        config: GatewayConfig,
        client: Arc<dyn LedgerClient>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let pool = IdentityPool::generate(config.identities, config.key_seed);
        if let Err(e) = pool.sync_nonces(client.as_ref()).await {
            warn!(error = %e, "Failed to sync nonces, starting from zero");
        }
        let recipients: Vec<_> = pool.identities().iter().map(|i| i.address()).collect();

        let workloads: HashMap<TxKind, Arc<dyn WorkloadGenerator>> = config
            .enabled_kinds
            .iter()
            .map(|kind| {
                (
                    *kind,
                    workload_for(*kind, recipients.clone(), config.target_chain),
                )
            })
            .collect();

        let pool = match workloads.get(&TxKind::CrossChain) {
            Some(workload) => {
                let ready = prepare_all(
                    client.as_ref(),
                    workload.as_ref(),
                    pool.identities().to_vec(),
                    config.confirmation_timeout,
                )
                .await;
                IdentityPool::from_identities(ready)
            }
            None => pool,
        };
        if pool.is_empty() {
            warn!("No identity available, every request will fail");
        }

        let (metrics, _metrics_task) = MetricsCollector::spawn()?;
        let tracker = ConfirmationTracker::new(
            TrackerConfig {
                recent_cache_size: config.recent_cache_size,
                pending_ttl: config.confirmation_timeout * 2,
                ..TrackerConfig::default()
            },
            metrics.clone(),
        );
        let blocks = client
            .subscribe_blocks()
            .await
            .map_err(GatewayError::Subscribe)?;
        let shutdown = CancellationToken::new();
        tokio::spawn(tracker.clone().run(blocks, shutdown.clone()));

        info!(
            identities = pool.len(),
            kinds = ?config.enabled_kinds,
            "Gateway ready"
        );

        let state = GatewayState {
            client,
            pool: Arc::new(pool),
            workloads: Arc::new(workloads),
            tracker,
            dispatcher: Dispatcher::new(config.max_in_flight),
            metrics,
            confirmation_timeout: config.confirmation_timeout,
        };
        Ok(Self {
            config,
            state,
            shutdown,
        })
    }

    /// The HTTP routes.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve on the configured address until `signal` resolves.
    pub async fn listen(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, signal).await
    }

    /// Serve on `listener` until `signal` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        info!(address = %listener.local_addr()?, "Starting gateway server");
        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;
        self.shutdown.cancel();
        result?;
        Ok(())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build the router over `state`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/submit", post(submit_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn submit_handler(
    State(state): State<GatewayState>,
    Query(query): Query<SubmitQuery>,
) -> Result<Json<SubmitResponse>, GatewayError> {
    let kind = match query.kind.as_deref() {
        Some(kind) => kind
            .parse::<TxKind>()
            .map_err(|e| GatewayError::UnknownKind(e.0))?,
        None => TxKind::Transfer,
    };
    let workload = state
        .workloads
        .get(&kind)
        .ok_or(GatewayError::KindDisabled(kind))?;
    let identity = state.pool.next().ok_or(GatewayError::NoIdentities)?;

    // The nonce is only taken once a submission slot is held, so a request
    // dropped while queued leaves no gap in the identity's nonce sequence.
    let permit = state.dispatcher.acquire().await?;
    let tx = {
        let mut rng = rand::thread_rng();
        workload.generate_one(&identity, &mut rng)
    };
    let hash = tx.hash();
    let pending = state.tracker.register(hash)?;

    state.metrics.record(MetricEvent::Attempted);
    let submitted = state.client.submit(&tx).await;
    drop(permit);
    match submitted {
        Ok(_) => state.metrics.record(MetricEvent::Submitted),
        Err(e) => {
            state.tracker.forget(&hash);
            state.metrics.record(MetricEvent::Failed);
            debug!(%hash, error = %e, "Submission rejected");
            return Err(GatewayError::Rejected(e));
        }
    }

    let confirmation = pending.wait(state.confirmation_timeout).await?;
    Ok(Json(SubmitResponse {
        hash,
        block_height: confirmation.block_height,
        delay_ms: u64::try_from(confirmation.delay.as_millis()).unwrap_or(u64::MAX),
    }))
}

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let confirmed = match state.metrics.snapshot().await {
        Ok(snapshot) => snapshot.confirmed,
        Err(_) => 0,
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        identities: state.pool.len(),
        pending: state.tracker.pending_len(),
        in_flight: state.dispatcher.in_flight(),
        confirmed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use ledgerbench_test_helpers::{MockLedger, MockLedgerConfig};
    use ledgerbench_types::KeyPair;
    use tower::ServiceExt;

    async fn start(ledger: &Arc<MockLedger>, config: GatewayConfig) -> Gateway {
        Gateway::start(config.with_identities(3), ledger.clone())
            .await
            .unwrap()
    }

    async fn post(gateway: &Gateway, uri: &str) -> Response {
        gateway
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_confirmation() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let gateway = start(&ledger, GatewayConfig::default()).await;

        let response = post(&gateway, "/submit").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: SubmitResponse = json(response).await;
        assert!(ledger.is_committed(&body.hash));
        assert!(body.block_height.0 >= 1);
        assert!(body.delay_ms <= 10);
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_kind_is_accepted() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let gateway = start(&ledger, GatewayConfig::default()).await;

        for kind in ["transfer", "invoke", "cross-chain"] {
            let response = post(&gateway, &format!("/submit?kind={}", kind)).await;
            assert_eq!(response.status(), StatusCode::OK, "kind {}", kind);
        }
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_504() {
        // No block producer: nothing is ever confirmed.
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let config = GatewayConfig::default()
            .with_enabled_kinds(vec![TxKind::Transfer])
            .with_confirmation_timeout(Duration::from_millis(200));
        let gateway = start(&ledger, config).await;

        let response = post(&gateway, "/submit?kind=transfer").await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(gateway.state.tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_disabled_kinds_are_rejected() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let config = GatewayConfig::default().with_enabled_kinds(vec![TxKind::Transfer]);
        let gateway = start(&ledger, config).await;

        let response = post(&gateway, "/submit?kind=mint").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = post(&gateway, "/submit?kind=invoke").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_returns_502() {
        let ledger = MockLedger::manual(MockLedgerConfig::default().with_fail_every(1));
        let config = GatewayConfig::default().with_enabled_kinds(vec![TxKind::Invoke]);
        let gateway = start(&ledger, config).await;

        let response = post(&gateway, "/submit?kind=invoke").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(gateway.state.tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_dropped_while_queued_keeps_nonces_contiguous() {
        let ledger = MockLedger::start(
            MockLedgerConfig::default().with_submit_latency(Duration::from_secs(1)),
        );
        let config = GatewayConfig::default()
            .with_identities(1)
            .with_max_in_flight(1)
            .with_enabled_kinds(vec![TxKind::Transfer]);
        let gateway = Gateway::start(config, ledger.clone()).await.unwrap();
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/submit")
                .body(Body::empty())
                .unwrap()
        };

        let first = tokio::spawn(gateway.router().oneshot(request()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gateway.state.dispatcher.in_flight(), 1);

        let queued = tokio::spawn(gateway.router().oneshot(request()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        queued.abort();
        assert!(queued.await.unwrap_err().is_cancelled());

        let response = first.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = post(&gateway, "/submit").await;
        assert_eq!(response.status(), StatusCode::OK);

        let identity = gateway.state.pool.get(0).unwrap();
        assert_eq!(identity.current_nonce(), 2);
        assert_eq!(ledger.submission_count(), 2);
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_identities() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let gateway = start(&ledger, GatewayConfig::default()).await;

        let response = gateway
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = json(response).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.identities, 3);
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_failing_setup_is_excluded() {
        let bad = KeyPair::from_u64_seed(1001).public_key();
        let ledger = MockLedger::start(MockLedgerConfig::default().with_rejected_sender(bad));
        let gateway = start(&ledger, GatewayConfig::default().with_key_seed(1000)).await;

        assert_eq!(gateway.state.pool.len(), 2);
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonces_synced_at_startup() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let pool = IdentityPool::generate(3, 1000);
        ledger.set_nonce(pool.get(0).unwrap().address(), 9);

        let config = GatewayConfig::default().with_enabled_kinds(vec![TxKind::Transfer]);
        let gateway = start(&ledger, config).await;
        assert_eq!(gateway.state.pool.get(0).unwrap().current_nonce(), 9);
        ledger.shutdown();
    }
}
