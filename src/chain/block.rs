use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::transaction::Transaction;
use crate::crypto;

/// Fixed contents of the genesis block. Every honest node derives the
/// same genesis hash from these, which is what lets freshly booted nodes
/// recognize each other's chains.
pub const GENESIS_INDEX: u64 = 1;
pub const GENESIS_TIMESTAMP: u64 = 1_234_567_890;
pub const GENESIS_NONCE: u64 = 100;
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// The difficulty floor; also the difficulty of the genesis block and
/// the starting value of the local miner.
pub const INITIAL_DIFFICULTY: u64 = 4;

/// A committed record of the ledger.
///
/// The timestamp is kept as a JSON number rather than a float so that the
/// integral genesis constant and fractional wall-clock stamps both
/// serialize exactly as they were produced; block hashes are computed
/// over that serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: Number,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub previous_hash: String,
    pub difficulty: u64,
}

impl Block {
    /// The genesis block shared by all nodes.
    pub fn genesis() -> Self {
        Block {
            index: GENESIS_INDEX,
            timestamp: Number::from(GENESIS_TIMESTAMP),
            transactions: vec![],
            nonce: GENESIS_NONCE,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// SHA-256 of the canonical JSON of the whole block.
    pub fn hash(&self) -> String {
        crypto::hash_value(self)
    }

    /// The timestamp in seconds since the epoch, for interval arithmetic.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp.as_f64().unwrap_or(0.0)
    }
}

/// The current wall clock as a block timestamp.
pub fn now_timestamp() -> Number {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs_f64();

    Number::from_f64(now).expect("wall clock is finite")
}
