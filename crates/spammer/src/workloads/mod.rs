//! Workload generation for transaction spamming.
//!
//! Provides the `WorkloadGenerator` trait and one implementation per
//! transaction kind. The kind is fixed per worker at configuration time.

mod cross_chain;
mod invoke;
mod transfer;

pub use cross_chain::{CrossChainWorkload, DEFAULT_RULE};
pub use invoke::{contract_address, InvokeWorkload};
pub use transfer::{RecipientSelection, TransferWorkload};

use crate::accounts::Identity;
use ledgerbench_types::{Address, ChainId, Payload, SignedTransaction, TxKind};
use rand::RngCore;
use std::sync::Arc;

/// Trait for generating transaction workloads.
///
/// Uses `&mut dyn RngCore` for dyn-compatibility.
pub trait WorkloadGenerator: Send + Sync {
    /// The kind of transaction this workload produces.
    fn kind(&self) -> TxKind;

    /// Payload of the next transaction sent by `identity`.
    fn next_payload(&self, identity: &Identity, rng: &mut dyn RngCore) -> Payload;

    /// One-time registration payloads `identity` must get confirmed, in
    /// order, before it joins the timed run.
    fn setup_payloads(&self, _identity: &Identity) -> Vec<Payload> {
        Vec::new()
    }

    /// Sign the next transaction, consuming one nonce of `identity`.
    fn generate_one(&self, identity: &Identity, rng: &mut dyn RngCore) -> SignedTransaction {
        identity.sign(self.next_payload(identity, rng))
    }
}

/// Build the workload for `kind`.
///
/// `recipients` are the transfer destinations; `target_chain` is only used by
/// cross-chain messages.
pub fn workload_for(
    kind: TxKind,
    recipients: Vec<Address>,
    target_chain: ChainId,
) -> Arc<dyn WorkloadGenerator> {
    match kind {
        TxKind::Transfer => Arc::new(TransferWorkload::new(recipients)),
        TxKind::Invoke => Arc::new(InvokeWorkload::default()),
        TxKind::CrossChain => Arc::new(CrossChainWorkload::new(target_chain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_factory_matches_kind() {
        for kind in TxKind::ALL {
            let workload = workload_for(kind, Vec::new(), ChainId(9));
            assert_eq!(workload.kind(), kind);
        }
    }

    #[test]
    fn test_only_cross_chain_needs_setup() {
        let identity = Identity::from_seed(0, 1);
        for kind in TxKind::ALL {
            let workload = workload_for(kind, Vec::new(), ChainId(9));
            assert_eq!(
                !workload.setup_payloads(&identity).is_empty(),
                kind.needs_setup()
            );
        }
    }

    #[test]
    fn test_generate_one_signs_with_identity() {
        let identity = Identity::from_seed(0, 1);
        let workload = workload_for(TxKind::Invoke, Vec::new(), ChainId(9));
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let tx = workload.generate_one(&identity, &mut rng);
        assert!(tx.verify());
        assert_eq!(tx.transaction().sender, identity.public_key());
        assert_eq!(identity.current_nonce(), 1);
    }
}
