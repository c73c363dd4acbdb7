//! Value transfer workload generator.

use crate::accounts::Identity;
use crate::workloads::WorkloadGenerator;
use ledgerbench_types::{Address, Payload, TxKind};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, RngCore};

/// How transfer recipients are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RecipientSelection {
    /// Uniformly at random.
    #[default]
    Random,
    /// Zipf-distributed: a few hot recipients receive most transfers.
    Zipf {
        /// Higher exponent = more skewed toward the first recipients.
        exponent: f64,
    },
}

/// Generates transfer transactions.
pub struct TransferWorkload {
    /// Candidate destinations.
    recipients: Vec<Address>,

    /// Recipient selection mode.
    selection: RecipientSelection,

    /// Precomputed Zipf weights over `recipients`, set for `Zipf` selection.
    zipf: Option<WeightedIndex<f64>>,

    /// Transfer amount per transaction.
    amount: u64,
}

impl TransferWorkload {
    /// Create a new transfer workload. With no recipients every identity
    /// pays itself.
    pub fn new(recipients: Vec<Address>) -> Self {
        Self {
            recipients,
            selection: RecipientSelection::default(),
            zipf: None,
            amount: 1,
        }
    }

    /// Set the recipient selection mode.
    pub fn with_selection(mut self, selection: RecipientSelection) -> Self {
        self.selection = selection;
        self.zipf = match selection {
            RecipientSelection::Random => None,
            RecipientSelection::Zipf { exponent } => zipf_weights(self.recipients.len(), exponent),
        };
        self
    }

    /// Set the transfer amount.
    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    fn pick_recipient(&self, sender: Address, rng: &mut dyn RngCore) -> Address {
        let n = self.recipients.len();
        if n == 0 {
            return sender;
        }
        let idx = match &self.zipf {
            Some(weights) => weights.sample(rng),
            None => rng.gen_range(0..n),
        };
        let to = self.recipients[idx];
        if to == sender && n > 1 {
            self.recipients[(idx + 1) % n]
        } else {
            to
        }
    }
}

/// Zipf weights `1 / (k + 1)^exponent` for ranks `0..n`.
///
/// Rank 0 is the most likely recipient. Returns `None` when no valid
/// distribution exists (no recipients, non-finite exponent).
fn zipf_weights(n: usize, exponent: f64) -> Option<WeightedIndex<f64>> {
    if !exponent.is_finite() {
        return None;
    }
    let exponent = exponent.max(0.0);
    WeightedIndex::new((1..=n).map(|rank| 1.0 / (rank as f64).powf(exponent))).ok()
}

impl WorkloadGenerator for TransferWorkload {
    fn kind(&self) -> TxKind {
        TxKind::Transfer
    }

    fn next_payload(&self, identity: &Identity, rng: &mut dyn RngCore) -> Payload {
        Payload::Transfer {
            to: self.pick_recipient(identity.address(), rng),
            amount: self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::IdentityPool;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn addresses(pool: &IdentityPool) -> Vec<Address> {
        pool.identities().iter().map(|i| i.address()).collect()
    }

    #[test]
    fn test_never_pays_self_when_others_exist() {
        let pool = IdentityPool::generate(3, 10);
        let workload = TransferWorkload::new(addresses(&pool)).with_amount(7);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sender = pool.get(0).unwrap();

        for _ in 0..50 {
            match workload.next_payload(sender, &mut rng) {
                Payload::Transfer { to, amount } => {
                    assert_ne!(to, sender.address());
                    assert_eq!(amount, 7);
                }
                other => panic!("unexpected payload {:?}", other),
            }
        }
    }

    #[test]
    fn test_no_recipients_pays_self() {
        let identity = Identity::from_seed(0, 3);
        let workload = TransferWorkload::new(Vec::new());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            workload.next_payload(&identity, &mut rng),
            Payload::Transfer {
                to: identity.address(),
                amount: 1
            }
        );
    }

    #[test]
    fn test_zipf_skews_toward_first_recipients() {
        let pool = IdentityPool::generate(20, 10);
        let recipients = addresses(&pool);
        let workload = TransferWorkload::new(recipients.clone())
            .with_selection(RecipientSelection::Zipf { exponent: 2.0 });
        let outsider = Identity::from_seed(99, 999);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let mut counts = vec![0usize; recipients.len()];
        for _ in 0..10_000 {
            if let Payload::Transfer { to, .. } = workload.next_payload(&outsider, &mut rng) {
                let idx = recipients.iter().position(|a| *a == to).unwrap();
                counts[idx] += 1;
            }
        }

        // 1 / zeta(2) of the mass lands on the first recipient (about 61%).
        assert!(counts[0] > 5_500, "counts {:?}", counts);
        assert!(counts.windows(2).take(3).all(|w| w[0] > w[1]), "counts {:?}", counts);
        assert!(counts[19] > 0, "counts {:?}", counts);
    }

    #[test]
    fn test_zipf_exponent_zero_is_uniform_support() {
        let weights = zipf_weights(4, 0.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[weights.sample(&mut rng)] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert!(zipf_weights(0, 1.0).is_none());
        assert!(zipf_weights(4, f64::NAN).is_none());
    }
}
