use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The sender address reserved for mining rewards. Submissions carrying
/// it are rejected; this ledger does not mint coins.
pub const COINBASE_SENDER: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Waiting in the pool for inclusion in a block.
    Pending,
    /// Included in a committed block.
    Success,
}

/// A transfer of some amount between two opaque addresses.
///
/// Transactions are unsigned: the protocol deduplicates them by `id` but
/// makes no attempt to authenticate the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub status: TxStatus,
}

impl Transaction {
    /// Create a fresh pending transaction with a new unique identifier.
    pub fn new(sender: &str, recipient: &str, amount: f64) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            status: TxStatus::Pending,
        }
    }

    /// Canonical form used for equality and hashing: sorted-keys JSON
    /// with the mutable `status` field stripped, so a transaction keeps
    /// its identity when it moves from pending to success.
    pub fn canonical(&self) -> String {
        match serde_json::to_value(self) {
            Ok(mut value) => {
                if let Some(object) = value.as_object_mut() {
                    object.remove("status");
                }
                value.to_string()
            }
            Err(e) => {
                warn!("Failed to canonicalize transaction {:?}: {:?}", self.id, e);
                String::new()
            }
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER
    }
}
