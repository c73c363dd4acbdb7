//! Signing identities and the pool they are drawn from.
//!
//! Every identity carries its own nonce counter. The counter is bumped
//! atomically immediately before each transaction is signed, so concurrent
//! users of the same identity never produce duplicate sequence numbers.

use futures::future::join_all;
use ledgerbench_client::{ClientError, LedgerClient};
use ledgerbench_types::{Address, KeyPair, Payload, PublicKey, SignedTransaction, Transaction};
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A pre-funded identity that signs transactions.
pub struct Identity {
    /// Position of this identity in the pool it was generated for.
    index: usize,

    /// The keypair for signing transactions.
    keypair: KeyPair,

    /// Address derived from the public key.
    address: Address,

    /// Next nonce to use.
    nonce: AtomicU64,
}

impl Identity {
    /// Derive an identity from a numeric seed.
    pub fn from_seed(index: usize, seed: u64) -> Self {
        let keypair = KeyPair::from_u64_seed(seed);
        let address = Address::from_public_key(&keypair.public_key());
        Self {
            index,
            keypair,
            address,
            nonce: AtomicU64::new(0),
        }
    }

    /// Position in the generating pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Account address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Public key.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Get the next nonce and increment.
    pub fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    pub fn current_nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Overwrite the nonce, e.g. with the value reported by the ledger.
    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    /// Take the next nonce and sign `payload` with it.
    pub fn sign(&self, payload: Payload) -> SignedTransaction {
        let nonce = self.next_nonce();
        Transaction::new(self.keypair.public_key(), nonce, payload).sign(&self.keypair)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("nonce", &self.current_nonce())
            .finish()
    }
}

/// How the pool picks the identity for the next request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionMode {
    /// Cycle through identities in order.
    #[default]
    RoundRobin,
    /// Pick uniformly at random.
    Random,
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(SelectionMode::RoundRobin),
            "random" => Ok(SelectionMode::Random),
            other => Err(format!("Unknown selection mode: {}", other)),
        }
    }
}

/// Fixed-size collection of identities shared by concurrent users.
pub struct IdentityPool {
    identities: Vec<Arc<Identity>>,
    mode: SelectionMode,
    cursor: AtomicUsize,
}

impl IdentityPool {
    /// Derive `count` identities from consecutive seeds starting at `base_seed`.
    pub fn generate(count: usize, base_seed: u64) -> Self {
        info!(count, base_seed, "Generating identity pool");
        let identities = (0..count)
            .map(|i| Arc::new(Identity::from_seed(i, base_seed.wrapping_add(i as u64))))
            .collect();
        Self::from_identities(identities)
    }

    /// Build a pool from existing identities.
    pub fn from_identities(identities: Vec<Arc<Identity>>) -> Self {
        Self {
            identities,
            mode: SelectionMode::default(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Set the selection mode.
    pub fn with_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pick the identity for the next request. `None` if the pool is empty.
    pub fn next(&self) -> Option<Arc<Identity>> {
        if self.identities.is_empty() {
            return None;
        }
        let idx = match self.mode {
            SelectionMode::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.identities.len()
            }
            SelectionMode::Random => rand::thread_rng().gen_range(0..self.identities.len()),
        };
        Some(Arc::clone(&self.identities[idx]))
    }

    /// Identity at `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<Identity>> {
        self.identities.get(index)
    }

    /// All identities, in generation order.
    pub fn identities(&self) -> &[Arc<Identity>] {
        &self.identities
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether the pool holds no identities.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Fetch every identity's next nonce from the ledger.
    pub async fn sync_nonces(&self, client: &dyn LedgerClient) -> Result<(), ClientError> {
        let lookups = self.identities.iter().map(|identity| async move {
            let nonce = client.account_nonce(&identity.address()).await?;
            identity.set_nonce(nonce);
            debug!(address = %identity.address(), nonce, "Synced nonce");
            Ok::<_, ClientError>(())
        });
        join_all(lookups).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbench_test_helpers::{MockLedger, MockLedgerConfig};
    use std::collections::HashSet;

    #[test]
    fn test_identity_generation() {
        let pool = IdentityPool::generate(5, 100);
        assert_eq!(pool.len(), 5);

        let addresses: HashSet<_> = pool.identities().iter().map(|i| i.address()).collect();
        assert_eq!(addresses.len(), 5, "addresses must be distinct");
    }

    #[test]
    fn test_round_robin_cycles() {
        let pool = IdentityPool::generate(3, 1);
        let picks: Vec<usize> = (0..6).map(|_| pool.next().unwrap().index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_random_selection_stays_in_range() {
        let pool = IdentityPool::generate(4, 1).with_selection_mode(SelectionMode::Random);
        for _ in 0..100 {
            assert!(pool.next().unwrap().index() < 4);
        }
    }

    #[test]
    fn test_empty_pool_yields_nothing() {
        assert!(IdentityPool::generate(0, 1).next().is_none());
    }

    #[test]
    fn test_concurrent_nonces_are_unique() {
        let identity = Arc::new(Identity::from_seed(0, 7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let identity = Arc::clone(&identity);
                std::thread::spawn(move || (0..500).map(|_| identity.next_nonce()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(seen.insert(nonce), "nonce {} issued twice", nonce);
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(identity.current_nonce(), 4000);
    }

    #[test]
    fn test_sign_consumes_nonce() {
        let identity = Identity::from_seed(0, 9);
        let to = Identity::from_seed(1, 10).address();
        let a = identity.sign(Payload::Transfer { to, amount: 1 });
        let b = identity.sign(Payload::Transfer { to, amount: 1 });
        assert_eq!(a.transaction().nonce, 0);
        assert_eq!(b.transaction().nonce, 1);
        assert!(a.verify() && b.verify());
    }

    #[tokio::test]
    async fn test_sync_nonces_from_ledger() {
        let ledger = MockLedger::manual(MockLedgerConfig::default());
        let pool = IdentityPool::generate(2, 50);
        ledger.set_nonce(pool.get(1).unwrap().address(), 42);

        pool.sync_nonces(&*ledger).await.unwrap();
        assert_eq!(pool.get(0).unwrap().current_nonce(), 0);
        assert_eq!(pool.get(1).unwrap().current_nonce(), 42);
    }
}
