//! Cross-chain message workload generator.
//!
//! Before an identity may route messages it registers the target chain and
//! deploys a routing rule towards it. Those two transactions are the
//! workload's setup; the timed run then sends one message per tick.

use crate::accounts::Identity;
use crate::workloads::WorkloadGenerator;
use ledgerbench_types::{ChainId, Payload, TxKind};
use rand::RngCore;

/// Rule name every identity deploys during setup.
pub const DEFAULT_RULE: &str = "forward";

/// Generates cross-chain messages towards one target chain.
pub struct CrossChainWorkload {
    target: ChainId,
    rule: String,
}

impl CrossChainWorkload {
    /// Create a workload routing to `target` through [`DEFAULT_RULE`].
    pub fn new(target: ChainId) -> Self {
        Self {
            target,
            rule: DEFAULT_RULE.to_string(),
        }
    }

    /// Use a different rule name.
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = rule.into();
        self
    }
}

impl WorkloadGenerator for CrossChainWorkload {
    fn kind(&self) -> TxKind {
        TxKind::CrossChain
    }

    fn next_payload(&self, identity: &Identity, rng: &mut dyn RngCore) -> Payload {
        Payload::CrossChain {
            target: self.target,
            rule: self.rule.clone(),
            message: format!("{}:{:016x}", identity.index(), rng.next_u64()),
        }
    }

    fn setup_payloads(&self, _identity: &Identity) -> Vec<Payload> {
        vec![
            Payload::RegisterChain { chain: self.target },
            Payload::DeployRule {
                target: self.target,
                rule: self.rule.clone(),
            },
        ]
    }
}
