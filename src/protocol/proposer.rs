use crate::chain::block::{now_timestamp, Block};
use crate::chain::ledger::Ledger;
use crate::chain::transaction::TxStatus;
use crate::p2p::codec::{Request, Response, Vote};
use crate::p2p::node::Node;

/// Approvals required to commit: strictly more than half of the cluster
/// (the leader plus its peers).
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Mine and commit the next block. Only the current leader does this,
/// and only when transactions are waiting.
///
/// The pending pool is snapshotted and the proof of work runs without
/// any lock held, so the dispatcher keeps serving (and voting) while we
/// mine. Nothing is removed from the pool until the block is actually
/// committed; losing the vote leaves the node exactly as it was.
pub fn mine_block(node: &Node) -> Option<Block> {
    match node.current_leader() {
        Some(leader) if leader == node.node_address() => {}
        other => {
            debug!("Not mining: current leader is {:?}, not us", other);
            return None;
        }
    }

    let (prev_index, prev_nonce, prev_hash, difficulty, mut transactions) = {
        let ledger = node.ledger.lock().unwrap();
        let last = ledger.last_block();
        (
            last.index,
            last.nonce,
            last.hash(),
            ledger.difficulty(),
            ledger.pending_snapshot(),
        )
    };

    if transactions.is_empty() {
        debug!("Not mining: no pending transactions");
        return None;
    }

    for transaction in &mut transactions {
        transaction.status = TxStatus::Success;
    }

    info!(
        "Mining block {} over {} transactions at difficulty {}",
        prev_index + 1,
        transactions.len(),
        difficulty
    );

    let block = Block {
        index: prev_index + 1,
        timestamp: now_timestamp(),
        transactions,
        nonce: Ledger::mine_nonce(prev_nonce, &prev_hash, difficulty),
        previous_hash: prev_hash,
        difficulty,
    };

    let peers = node.nodes();
    let cluster_size = peers.len() + 1;
    let needed = quorum(cluster_size);
    let mut approvals = 1; // the leader's own vote

    for peer in &peers {
        match node.request_peer(peer, &Request::BlockPropose { block: block.clone() }) {
            Some(Response::Vote { vote: Vote::Approve }) => approvals += 1,
            Some(Response::Vote { vote: Vote::Reject }) => {
                debug!("Peer {:?} rejected block {}", peer, block.index)
            }
            _ => debug!("No vote from {:?} on block {}", peer, block.index),
        }
    }

    if approvals < needed {
        info!(
            "Block {} fell short of quorum ({} of {} approvals needed across {} nodes), aborting",
            block.index, approvals, needed, cluster_size
        );
        return None;
    }

    // the local append must precede the commit fanout, so a follower
    // that syncs against us right away already sees the block
    {
        let mut ledger = node.ledger.lock().unwrap();
        if ledger.last_block().hash() != block.previous_hash {
            info!("Tip moved while mining block {}, discarding it", block.index);
            return None;
        }
        ledger.append_committed(block.clone());
    }

    node.broadcast(&Request::BlockCommit {
        block: block.clone(),
    });

    info!(
        "Block {} committed with {} of {} required approvals",
        block.index, approvals, needed
    );

    Some(block)
}
