use std::collections::HashSet;
use thiserror::Error;

use crate::chain::block::{Block, INITIAL_DIFFICULTY};
use crate::chain::transaction::{Transaction, TxStatus};
use crate::crypto;

/// The block interval the difficulty adjustment steers towards.
pub const TARGET_BLOCK_TIME_SECS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transactions from the coinbase sender \"0\" are not accepted")]
    CoinbaseSender,

    #[error("transaction amount must be a non-negative number")]
    InvalidAmount,
}

/// The in-memory ledger of a single node: the committed chain, the pool
/// of pending transactions and the deduplication sets guarding gossip.
///
/// The store performs no I/O. Everything network-shaped (gossip of
/// admitted transactions, chain downloads) lives above it in the node
/// layer, which serializes access through a mutex.
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    seen_transactions: HashSet<String>,
    seen_blocks: HashSet<String>,
    difficulty: u64,
}

impl Ledger {
    /// A fresh ledger holding only the genesis block.
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let mut seen_blocks = HashSet::new();
        seen_blocks.insert(genesis.hash());

        Ledger {
            chain: vec![genesis],
            pending: vec![],
            seen_transactions: HashSet::new(),
            seen_blocks,
            difficulty: INITIAL_DIFFICULTY,
        }
    }

    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("chain always contains genesis")
    }

    /// The index the next committed block will carry.
    pub fn next_index(&self) -> u64 {
        self.last_block().index + 1
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.chain.clone()
    }

    /// Hash of the first block; chains grown from a different genesis
    /// are never comparable with ours.
    pub fn genesis_hash(&self) -> String {
        self.chain[0].hash()
    }

    pub fn pending_snapshot(&self) -> Vec<Transaction> {
        self.pending.clone()
    }

    pub fn has_block(&self, hash: &str) -> bool {
        self.seen_blocks.contains(hash)
    }

    /// Accept a client submission: assign a fresh id, validate, admit to
    /// the pool. Returns the index of the block that will hold the
    /// transaction together with the admitted transaction, so the caller
    /// can gossip it.
    pub fn submit_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        amount: f64,
    ) -> Result<(u64, Transaction), LedgerError> {
        let transaction = Transaction::new(sender, recipient, amount);
        self.check_transaction(&transaction)?;

        self.admit(transaction.clone());

        Ok((self.next_index(), transaction))
    }

    /// Accept a transaction arriving over gossip, keeping its id.
    /// Idempotent: returns true only the first time an id is admitted,
    /// which is also the only time the caller should re-gossip it.
    pub fn ingest_transaction(&mut self, transaction: Transaction) -> bool {
        if self.check_transaction(&transaction).is_err() {
            debug!(
                "Dropping invalid gossiped transaction {:?} from {:?}",
                transaction.id, transaction.sender
            );
            return false;
        }

        self.admit(transaction)
    }

    fn check_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        if transaction.is_coinbase() {
            return Err(LedgerError::CoinbaseSender);
        }

        if !transaction.amount.is_finite() || transaction.amount < 0.0 {
            return Err(LedgerError::InvalidAmount);
        }

        Ok(())
    }

    fn admit(&mut self, mut transaction: Transaction) -> bool {
        if self.seen_transactions.contains(&transaction.id) {
            return false;
        }

        if self.pending.iter().any(|tx| tx.id == transaction.id) {
            return false;
        }

        transaction.status = TxStatus::Pending;
        self.seen_transactions.insert(transaction.id.clone());
        self.pending.push(transaction);

        true
    }

    /// Append a committed block to the chain.
    ///
    /// Records the block hash and every contained transaction id in the
    /// seen sets (so neither can re-enter via gossip), removes committed
    /// transactions from the pool and adjusts the local mining
    /// difficulty.
    pub fn append_committed(&mut self, block: Block) {
        info!(
            "Appending block {} carrying {} transactions",
            block.index,
            block.transactions.len()
        );

        self.seen_blocks.insert(block.hash());
        for tx in &block.transactions {
            self.seen_transactions.insert(tx.id.clone());
        }

        self.chain.push(block);
        self.cleanup_pending();
        self.adjust_difficulty();
    }

    /// Drop every pending transaction whose id already sits in a
    /// committed block. Run after every chain mutation.
    pub fn cleanup_pending(&mut self) {
        let committed: HashSet<&str> = self
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(|tx| tx.id.as_str())
            .collect();

        self.pending.retain(|tx| !committed.contains(tx.id.as_str()));
    }

    /// Replace the local chain by `remote` if it is valid, shares our
    /// genesis and carries strictly more cumulative work. Returns whether
    /// a replacement happened.
    pub fn try_adopt(&mut self, remote: Vec<Block>) -> bool {
        if !Self::valid_chain(&remote) {
            debug!("Not adopting remote chain: validation failed");
            return false;
        }

        if remote[0].hash() != self.chain[0].hash() {
            debug!("Not adopting remote chain: genesis block differs from ours");
            return false;
        }

        let local_work = Self::cumulative_work(&self.chain);
        let remote_work = Self::cumulative_work(&remote);
        if remote_work <= local_work {
            debug!(
                "Keeping own chain: local work {} >= remote work {}",
                local_work, remote_work
            );
            return false;
        }

        info!(
            "Replacing own chain of length {} (work {}) with remote chain of length {} (work {})",
            self.chain.len(),
            local_work,
            remote.len(),
            remote_work
        );

        for block in &remote {
            self.seen_blocks.insert(block.hash());
            for tx in &block.transactions {
                self.seen_transactions.insert(tx.id.clone());
            }
        }

        self.chain = remote;
        self.cleanup_pending();

        true
    }

    /// The proof-of-work predicate: the SHA-256 of the concatenation of
    /// the previous nonce, the candidate nonce and the previous block
    /// hash must start with `difficulty` hex zeros.
    pub fn valid_proof(prev_nonce: u64, nonce: u64, prev_hash: &str, difficulty: u64) -> bool {
        let guess = format!("{}{}{}", prev_nonce, nonce, prev_hash);
        let digest = crypto::sha256_hex(guess.as_bytes());

        digest.starts_with(&"0".repeat(difficulty as usize))
    }

    /// Scan nonces from zero until the proof predicate holds.
    pub fn mine_nonce(prev_nonce: u64, prev_hash: &str, difficulty: u64) -> u64 {
        let mut nonce = 0;
        while !Self::valid_proof(prev_nonce, nonce, prev_hash, difficulty) {
            nonce += 1;
        }

        nonce
    }

    /// Mine a nonce against the current tip at the current difficulty.
    pub fn proof_of_work(&self) -> u64 {
        let last = self.last_block();
        Self::mine_nonce(last.nonce, &last.hash(), self.difficulty)
    }

    /// Walk positions 1..N-1 and verify linkage and proof of work for
    /// each block against its predecessor. Position 0 is trusted as
    /// genesis; an empty sequence is never a valid chain.
    pub fn valid_chain(chain: &[Block]) -> bool {
        if chain.is_empty() {
            return false;
        }

        for window in chain.windows(2) {
            let (prev, block) = (&window[0], &window[1]);
            let prev_hash = prev.hash();

            if block.index != prev.index + 1 {
                return false;
            }
            if block.previous_hash != prev_hash {
                return false;
            }
            if !Self::valid_proof(prev.nonce, block.nonce, &prev_hash, block.difficulty) {
                return false;
            }
        }

        true
    }

    /// The fork choice weight of a chain: the sum of the difficulty of
    /// every block in it.
    pub fn cumulative_work(chain: &[Block]) -> u64 {
        chain.iter().map(|block| block.difficulty).sum()
    }

    /// SHA-256 of the canonical JSON of the whole chain.
    pub fn hash_chain(chain: &[Block]) -> String {
        crypto::hash_value(&chain)
    }

    /// Steer the local mining difficulty after an append: one step up if
    /// the last interval undershot the target, one step down (never below
    /// the floor) if it overshot it by more than twice. The difficulty
    /// recorded inside committed blocks is untouched.
    fn adjust_difficulty(&mut self) {
        if self.chain.len() < 2 {
            return;
        }

        let last = &self.chain[self.chain.len() - 1];
        let previous = &self.chain[self.chain.len() - 2];
        let interval = last.timestamp_secs() - previous.timestamp_secs();

        if interval < TARGET_BLOCK_TIME_SECS {
            self.difficulty += 1;
            debug!(
                "Block interval {:.2}s below target, difficulty raised to {}",
                interval, self.difficulty
            );
        } else if interval > 2.0 * TARGET_BLOCK_TIME_SECS && self.difficulty > INITIAL_DIFFICULTY {
            self.difficulty -= 1;
            debug!(
                "Block interval {:.2}s above target, difficulty lowered to {}",
                interval, self.difficulty
            );
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::new()
    }
}
