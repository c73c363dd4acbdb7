//! Transactions issued by the load generator.

use crate::{transaction_message, Address, ChainId, Hash, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of transaction a workload produces.
///
/// Chosen once per worker at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxKind {
    /// Simple value transfer between two accounts.
    #[default]
    Transfer,
    /// Contract method invocation.
    Invoke,
    /// Message routed to another chain through a deployed rule.
    CrossChain,
}

impl TxKind {
    /// All supported kinds.
    pub const ALL: [TxKind; 3] = [TxKind::Transfer, TxKind::Invoke, TxKind::CrossChain];

    /// Whether identities must run a one-time registration before sending
    /// this kind of transaction.
    pub fn needs_setup(self) -> bool {
        matches!(self, TxKind::CrossChain)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::Invoke => "invoke",
            TxKind::CrossChain => "cross-chain",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = UnknownTxKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transfer" => Ok(TxKind::Transfer),
            "invoke" | "contract" => Ok(TxKind::Invoke),
            "cross-chain" | "crosschain" | "cross_chain" => Ok(TxKind::CrossChain),
            other => Err(UnknownTxKind(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown transaction kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown transaction kind: {0}")]
pub struct UnknownTxKind(pub String);

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Move `amount` to `to`.
    Transfer { to: Address, amount: u64 },
    /// Call `method` on `contract` with integer arguments.
    Invoke {
        contract: Address,
        method: String,
        args: Vec<u64>,
    },
    /// Send `message` to `target` through the named rule.
    CrossChain {
        target: ChainId,
        rule: String,
        message: String,
    },
    /// Register the sender as a participant of `chain` (setup step).
    RegisterChain { chain: ChainId },
    /// Deploy a routing rule towards `target` (setup step).
    DeployRule { target: ChainId, rule: String },
}

impl Payload {
    /// Canonical binary encoding used in the signing message.
    ///
    /// Tag byte, then fields in declaration order; strings and vectors are
    /// length-prefixed with a little-endian u32.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self {
            Payload::Transfer { to, amount } => {
                out.push(0);
                out.extend_from_slice(&to.0);
                out.extend_from_slice(&amount.to_le_bytes());
            }
            Payload::Invoke {
                contract,
                method,
                args,
            } => {
                out.push(1);
                out.extend_from_slice(&contract.0);
                put_bytes(&mut out, method.as_bytes());
                out.extend_from_slice(&(args.len() as u32).to_le_bytes());
                for arg in args {
                    out.extend_from_slice(&arg.to_le_bytes());
                }
            }
            Payload::CrossChain {
                target,
                rule,
                message,
            } => {
                out.push(2);
                out.extend_from_slice(&target.0.to_le_bytes());
                put_bytes(&mut out, rule.as_bytes());
                put_bytes(&mut out, message.as_bytes());
            }
            Payload::RegisterChain { chain } => {
                out.push(3);
                out.extend_from_slice(&chain.0.to_le_bytes());
            }
            Payload::DeployRule { target, rule } => {
                out.push(4);
                out.extend_from_slice(&target.0.to_le_bytes());
                put_bytes(&mut out, rule.as_bytes());
            }
        }
        out
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Public key of the signing identity.
    pub sender: PublicKey,
    /// Per-sender sequence number.
    pub nonce: u64,
    /// What the transaction does.
    pub payload: Payload,
}

impl Transaction {
    /// Create a new transaction.
    pub fn new(sender: PublicKey, nonce: u64, payload: Payload) -> Self {
        Self {
            sender,
            nonce,
            payload,
        }
    }

    /// The domain-separated message that gets signed.
    pub fn signing_message(&self) -> Vec<u8> {
        transaction_message(&self.sender, self.nonce, &self.payload.encode())
    }

    /// Hash of the signing message; the transaction's identity on chain.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.signing_message())
    }

    /// Sign with `keypair`. The keypair should match `sender`.
    pub fn sign(self, keypair: &KeyPair) -> SignedTransaction {
        let message = self.signing_message();
        let hash = Hash::from_bytes(&message);
        let signature = keypair.sign(&message);
        SignedTransaction {
            transaction: self,
            signature,
            hash,
        }
    }
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SignedTransactionWire", into = "SignedTransactionWire")]
pub struct SignedTransaction {
    transaction: Transaction,
    signature: Signature,
    hash: Hash,
}

impl SignedTransaction {
    /// The signed transaction body.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// The signature over the signing message.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Transaction hash, computed once at signing time.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Check the signature against the sender's public key.
    pub fn verify(&self) -> bool {
        self.transaction
            .sender
            .verify(&self.transaction.signing_message(), &self.signature)
    }

    /// JSON encoding, hex-wrapped for the submission endpoint.
    pub fn to_hex(&self) -> Result<String, serde_json::Error> {
        serde_json::to_vec(self).map(hex::encode)
    }
}

/// Serialized form; the hash is recomputed on decode rather than trusted.
#[derive(Serialize, Deserialize)]
struct SignedTransactionWire {
    transaction: Transaction,
    signature: Signature,
}

impl From<SignedTransactionWire> for SignedTransaction {
    fn from(wire: SignedTransactionWire) -> Self {
        let hash = wire.transaction.hash();
        SignedTransaction {
            transaction: wire.transaction,
            signature: wire.signature,
            hash,
        }
    }
}

impl From<SignedTransaction> for SignedTransactionWire {
    fn from(tx: SignedTransaction) -> Self {
        SignedTransactionWire {
            transaction: tx.transaction,
            signature: tx.signature,
        }
    }
}
