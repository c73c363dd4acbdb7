//! Contract invocation workload generator.

use crate::accounts::Identity;
use crate::workloads::WorkloadGenerator;
use ledgerbench_types::{Address, Hash, Payload, TxKind};
use rand::{Rng, RngCore};

/// Generates calls to a single contract method.
pub struct InvokeWorkload {
    contract: Address,
    method: String,
    /// Number of random integer arguments per call.
    arity: usize,
}

impl Default for InvokeWorkload {
    fn default() -> Self {
        Self::new(contract_address("counter"), "increment")
    }
}

impl InvokeWorkload {
    /// Create a workload calling `method` on `contract`.
    pub fn new(contract: Address, method: impl Into<String>) -> Self {
        Self {
            contract,
            method: method.into(),
            arity: 1,
        }
    }

    /// Set the number of arguments per call.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    /// Target contract.
    pub fn contract(&self) -> Address {
        self.contract
    }
}

/// Well-known address of a named contract.
pub fn contract_address(name: &str) -> Address {
    let hash = Hash::from_parts(&[b"contract:", name.as_bytes()]);
    let mut bytes = [0u8; Address::BYTES];
    bytes.copy_from_slice(&hash.as_bytes()[..Address::BYTES]);
    Address(bytes)
}

impl WorkloadGenerator for InvokeWorkload {
    fn kind(&self) -> TxKind {
        TxKind::Invoke
    }

    fn next_payload(&self, _identity: &Identity, rng: &mut dyn RngCore) -> Payload {
        Payload::Invoke {
            contract: self.contract,
            method: self.method.clone(),
            args: (0..self.arity).map(|_| rng.gen_range(1..=1_000)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_contract_address_is_stable() {
        assert_eq!(contract_address("counter"), contract_address("counter"));
        assert_ne!(contract_address("counter"), contract_address("vault"));
    }

    #[test]
    fn test_payload_shape() {
        let identity = Identity::from_seed(0, 5);
        let workload = InvokeWorkload::new(contract_address("vault"), "deposit").with_arity(3);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        match workload.next_payload(&identity, &mut rng) {
            Payload::Invoke {
                contract,
                method,
                args,
            } => {
                assert_eq!(contract, workload.contract());
                assert_eq!(method, "deposit");
                assert_eq!(args.len(), 3);
                assert!(args.iter().all(|a| (1..=1_000).contains(a)));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_same_seed_same_payloads() {
        let identity = Identity::from_seed(0, 5);
        let workload = InvokeWorkload::default();
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(
                workload.next_payload(&identity, &mut a),
                workload.next_payload(&identity, &mut b)
            );
        }
    }
}
