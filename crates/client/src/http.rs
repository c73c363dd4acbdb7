//! JSON-over-HTTP ledger client.

use crate::types::{
    BlockResponse, NodeStatusResponse, NonceResponse, SubmitTransactionRequest,
    SubmitTransactionResponse, TransactionState, TransactionStatusResponse,
};
use crate::{BlockStream, ClientError, LedgerClient};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ledgerbench_types::{
    Address, BlockEvent, BlockHeight, ChainMetadata, Hash, Receipt, SignedTransaction,
};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for [`HttpLedgerClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the node, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// How often `submit_and_wait` polls for the transaction status.
    pub receipt_poll_interval: Duration,
    /// Upper bound on `submit_and_wait`.
    pub receipt_timeout: Duration,
    /// How often the block stream polls for the next height.
    pub block_poll_interval: Duration,
    /// Consecutive failures after which the block stream gives up.
    pub max_stream_errors: u32,
}

impl HttpClientConfig {
    /// Create a configuration with default timings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_millis(250),
            receipt_timeout: Duration::from_secs(60),
            block_poll_interval: Duration::from_millis(100),
            max_stream_errors: 10,
        }
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the receipt wait timeout.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Set the block polling interval.
    pub fn with_block_poll_interval(mut self, interval: Duration) -> Self {
        self.block_poll_interval = interval;
        self
    }
}

/// Ledger client speaking the node's JSON HTTP API.
#[derive(Clone)]
pub struct HttpLedgerClient {
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpLedgerClient {
    /// Create a new client.
    pub fn new(config: HttpClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Create a client for `base_url` with default timings.
    pub fn connect(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(HttpClientConfig::new(base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Poll the status endpoint until the node answers or `timeout` elapses.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<ChainMetadata, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.chain_metadata().await {
                Ok(meta) => {
                    info!(chain_id = meta.chain_id.0, height = meta.height.0, "Node ready");
                    return Ok(meta);
                }
                Err(e) if Instant::now() < deadline => {
                    debug!(error = %e, "Node not ready yet");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(_) => return Err(ClientError::Timeout(timeout)),
            }
        }
    }

    async fn transaction_status(&self, hash: &Hash) -> Result<TransactionStatusResponse, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/transaction/{}", hash)))
            .send()
            .await?;
        decode(resp).await
    }

    async fn fetch_block(
        http: &reqwest::Client,
        base_url: &str,
        height: BlockHeight,
    ) -> Result<Option<BlockEvent>, ClientError> {
        let resp = http
            .get(format!("{}/api/v1/blocks/{}", base_url, height.0))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let block: BlockResponse = decode(resp).await?;
        Ok(Some(block.into()))
    }
}

/// Turn a response into `T`, mapping non-success statuses to errors.
async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

/// State carried between polls of the block stream.
struct BlockPoller {
    http: reqwest::Client,
    base_url: String,
    next: BlockHeight,
    poll_interval: Duration,
    errors: u32,
    max_errors: u32,
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, tx: &SignedTransaction) -> Result<Hash, ClientError> {
        let request = SubmitTransactionRequest {
            transaction_hex: tx.to_hex()?,
        };
        let resp = self
            .http
            .post(self.url("/api/v1/transaction/submit"))
            .json(&request)
            .send()
            .await?;
        let body: SubmitTransactionResponse = decode(resp).await?;

        if !body.accepted {
            return Err(ClientError::Rejected(
                body.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        let hash = body.hash.unwrap_or_else(|| tx.hash());
        if hash != tx.hash() {
            warn!(local = %tx.hash(), remote = %hash, "Node reported a different transaction hash");
        }
        Ok(hash)
    }

    async fn submit_and_wait(&self, tx: &SignedTransaction) -> Result<Receipt, ClientError> {
        let hash = self.submit(tx).await?;
        let deadline = Instant::now() + self.config.receipt_timeout;

        loop {
            let status = self.transaction_status(&hash).await?;
            match status.status {
                TransactionState::Rejected => {
                    return Err(ClientError::Rejected(
                        status.error.unwrap_or_else(|| "rejected".to_string()),
                    ))
                }
                TransactionState::Committed => {
                    let receipt = status
                        .into_receipt()
                        .ok_or_else(|| ClientError::Decode("committed without receipt".into()))?;
                    if !receipt.success {
                        return Err(ClientError::Failed {
                            hash,
                            reason: receipt.error.unwrap_or_default(),
                        });
                    }
                    return Ok(receipt);
                }
                TransactionState::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout(self.config.receipt_timeout));
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, ClientError> {
        let start = self.chain_metadata().await?.height.next();
        info!(from = start.0, "Subscribing to blocks");

        let poller = BlockPoller {
            http: self.http.clone(),
            base_url: self.config.base_url.clone(),
            next: start,
            poll_interval: self.config.block_poll_interval,
            errors: 0,
            max_errors: self.config.max_stream_errors,
        };

        let stream = stream::unfold(poller, |mut p| async move {
            loop {
                match HttpLedgerClient::fetch_block(&p.http, &p.base_url, p.next).await {
                    Ok(Some(block)) => {
                        p.errors = 0;
                        p.next = p.next.next();
                        return Some((block, p));
                    }
                    Ok(None) => tokio::time::sleep(p.poll_interval).await,
                    Err(e) => {
                        p.errors += 1;
                        if p.errors >= p.max_errors {
                            warn!(error = %e, height = p.next.0, "Block stream giving up");
                            return None;
                        }
                        debug!(error = %e, attempt = p.errors, "Block poll failed");
                        tokio::time::sleep(p.poll_interval).await;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn chain_metadata(&self) -> Result<ChainMetadata, ClientError> {
        let resp = self.http.get(self.url("/api/v1/status")).send().await?;
        let status: NodeStatusResponse = decode(resp).await?;
        Ok(status.into())
    }

    async fn account_nonce(&self, address: &Address) -> Result<u64, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/accounts/{}/nonce", address)))
            .send()
            .await?;
        let body: NonceResponse = decode(resp).await?;
        Ok(body.nonce)
    }
}
