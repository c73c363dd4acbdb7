//! One-time identity setup before a timed run.
//!
//! Workloads such as cross-chain messaging require every identity to get a
//! short sequence of registration transactions confirmed first. Setup runs
//! for all identities concurrently; an identity whose setup fails is dropped
//! from the run with a warning instead of failing the whole benchmark.

use crate::accounts::Identity;
use crate::workloads::WorkloadGenerator;
use futures::future::join_all;
use ledgerbench_client::{ClientError, LedgerClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why an identity could not be prepared.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Setup step {step} of identity {identity} failed: {source}")]
    Submit {
        identity: usize,
        step: usize,
        #[source]
        source: ClientError,
    },

    #[error("Setup step {step} of identity {identity} was rejected: {reason}")]
    Rejected {
        identity: usize,
        step: usize,
        reason: String,
    },

    #[error("Setup of identity {identity} did not finish within {timeout:?}")]
    Timeout { identity: usize, timeout: Duration },
}

/// Submit every setup payload of `identity` in order, waiting for each to be
/// confirmed before sending the next.
pub async fn prepare_identity(
    client: &dyn LedgerClient,
    workload: &dyn WorkloadGenerator,
    identity: &Identity,
) -> Result<(), SetupError> {
    for (step, payload) in workload.setup_payloads(identity).into_iter().enumerate() {
        let tx = identity.sign(payload);
        let receipt = client
            .submit_and_wait(&tx)
            .await
            .map_err(|source| SetupError::Submit {
                identity: identity.index(),
                step,
                source,
            })?;
        if !receipt.success {
            return Err(SetupError::Rejected {
                identity: identity.index(),
                step,
                reason: receipt.error.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        debug!(identity = identity.index(), step, height = receipt.block_height.0, "Setup step confirmed");
    }
    Ok(())
}

/// Prepare all `identities` concurrently, each bounded by `timeout`.
///
/// Returns the identities that completed setup, in their original order.
pub async fn prepare_all(
    client: &dyn LedgerClient,
    workload: &dyn WorkloadGenerator,
    identities: Vec<Arc<Identity>>,
    timeout: Duration,
) -> Vec<Arc<Identity>> {
    let total = identities.len();
    let results = join_all(identities.iter().map(|identity| async move {
        tokio::time::timeout(timeout, prepare_identity(client, workload, identity))
            .await
            .unwrap_or_else(|_| {
                Err(SetupError::Timeout {
                    identity: identity.index(),
                    timeout,
                })
            })
    }))
    .await;

    let ready: Vec<Arc<Identity>> = identities
        .into_iter()
        .zip(results)
        .filter_map(|(identity, result)| match result {
            Ok(()) => Some(identity),
            Err(e) => {
                warn!(identity = identity.index(), error = %e, "Setup failed, dropping worker");
                None
            }
        })
        .collect();

    info!(ready = ready.len(), dropped = total - ready.len(), "Setup complete");
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::IdentityPool;
    use crate::workloads::workload_for;
    use ledgerbench_test_helpers::{MockLedger, MockLedgerConfig};
    use ledgerbench_types::{ChainId, TxKind};
    use tracing_test::traced_test;

    #[tokio::test(start_paused = true)]
    async fn test_setup_confirms_each_step() {
        let ledger = MockLedger::start(MockLedgerConfig::default());
        let identity = Identity::from_seed(0, 1);
        let workload = workload_for(TxKind::CrossChain, Vec::new(), ChainId(2));

        prepare_identity(&*ledger, &*workload, &identity).await.unwrap();
        assert_eq!(identity.current_nonce(), 2);
        assert_eq!(ledger.committed_count(), 2);
        ledger.shutdown();
    }

    #[tokio::test]
    async fn test_no_setup_needed_is_noop() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let identity = Identity::from_seed(0, 1);
        let workload = workload_for(TxKind::Transfer, Vec::new(), ChainId(2));

        prepare_identity(&*ledger, &*workload, &identity).await.unwrap();
        assert_eq!(ledger.submission_count(), 0);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_failed_identity_is_dropped() {
        let pool = IdentityPool::generate(3, 40);
        let bad = pool.get(1).unwrap().public_key();
        let ledger = MockLedger::start(MockLedgerConfig::default().with_rejected_sender(bad));
        let workload = workload_for(TxKind::CrossChain, Vec::new(), ChainId(2));

        let ready = prepare_all(
            &*ledger,
            &*workload,
            pool.identities().to_vec(),
            Duration::from_secs(5),
        )
        .await;

        let indices: Vec<usize> = ready.iter().map(|i| i.index()).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(logs_contain("Setup failed, dropping worker"));
        ledger.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_times_out_without_blocks() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let identity = Arc::new(Identity::from_seed(0, 1));
        let workload = workload_for(TxKind::CrossChain, Vec::new(), ChainId(2));

        let ready = prepare_all(&*ledger, &*workload, vec![identity], Duration::from_secs(1)).await;
        assert!(ready.is_empty());
    }
}
