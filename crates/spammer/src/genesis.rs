//! Funding file generation for ledger setup.
//!
//! Generates TOML listing the benchmark identities and the balance each
//! must hold before a run, so a ledger can fund them at genesis.

use crate::accounts::IdentityPool;
use std::fmt::Write;

/// Generate TOML-formatted funding entries for `count` identities derived
/// from `key_seed`.
///
/// Output format:
/// ```toml
/// [[genesis.balances]]
/// address = "0x..."
/// public_key = "..."
/// balance = 1000000
/// ```
pub fn generate_funding_toml(count: usize, key_seed: u64, balance: u64) -> String {
    let pool = IdentityPool::generate(count, key_seed);
    format_balances_toml(&pool, balance)
}

/// Format every identity of `pool` as a funding entry.
pub fn format_balances_toml(pool: &IdentityPool, balance: u64) -> String {
    let mut output = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(output, "# Generated balances for benchmark identities");
    let _ = writeln!(output, "# {} accounts total", pool.len());
    let _ = writeln!(output);

    for identity in pool.identities() {
        let _ = writeln!(output, "[[genesis.balances]]");
        let _ = writeln!(output, "address = \"{}\"", identity.address());
        let _ = writeln!(output, "public_key = \"{}\"", identity.public_key().to_hex());
        let _ = writeln!(output, "balance = {}", balance);
        let _ = writeln!(output);
    }

    output
}
