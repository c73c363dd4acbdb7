//! Domain-separated signing messages.
//!
//! Every signed message starts with a domain tag so that a signature made in
//! one context can never be replayed in another.
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `ledgerbench_tx:` | Ledger transactions |

use crate::PublicKey;

/// Domain tag for ledger transactions.
///
/// Format: `ledgerbench_tx:` || sender_public_key || nonce || encoded_payload
pub const DOMAIN_TRANSACTION: &[u8] = b"ledgerbench_tx:";

/// Build the signing message for a transaction.
///
/// The transaction hash is the Blake3 hash of this message, so client and
/// ledger agree on a hash without a round trip.
pub fn transaction_message(sender: &PublicKey, nonce: u64, encoded_payload: &[u8]) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(DOMAIN_TRANSACTION.len() + 32 + 8 + encoded_payload.len());
    message.extend_from_slice(DOMAIN_TRANSACTION);
    message.extend_from_slice(sender.as_bytes());
    message.extend_from_slice(&nonce.to_le_bytes());
    message.extend_from_slice(encoded_payload);
    message
}
