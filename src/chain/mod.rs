/// Transactions as submitted by clients and carried inside blocks.
pub mod transaction;

/// The block structure and the fixed genesis constants.
pub mod block;

/// The ledger store: chain, pending pool, seen sets, proof of work
/// and the fork choice rule.
pub mod ledger;
