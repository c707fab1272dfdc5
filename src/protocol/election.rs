use std::sync::atomic::Ordering;

use crate::crypto::Submission;
use crate::p2p::codec::{Request, Response};
use crate::p2p::node::Node;

/// Period of the shared election epoch grid.
pub const ELECTION_PERIOD_SECS: u64 = 30;

/// Releases the re-entrancy guard however the round ends.
struct ElectionGuard<'a>(&'a Node);

impl Drop for ElectionGuard<'_> {
    fn drop(&mut self) {
        self.0.election_in_progress.store(false, Ordering::SeqCst);
    }
}

/// Run one election round and adopt the winner locally.
pub fn elect_leader(node: &Node) -> Option<String> {
    run_guarded(node, false)
}

/// Run one election round, adopt the winner locally and announce it to
/// every peer so followers need not re-run the round themselves.
pub fn broadcast_election(node: &Node) -> Option<String> {
    run_guarded(node, true)
}

fn run_guarded(node: &Node, announce: bool) -> Option<String> {
    if node
        .election_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("Election already in progress, not starting another");
        return node.current_leader();
    }

    let _guard = ElectionGuard(node);
    run_round(node, announce)
}

/// One randomized election round.
///
/// The seed is the hash of our last block after a sync, so all nodes on
/// the same chain draw from the same value. Every reachable candidate
/// (including ourselves) signs the seed; the smallest verified output
/// hash wins. Candidates on a divergent chain sign a different seed and
/// fall out at signature verification.
fn run_round(node: &Node, announce: bool) -> Option<String> {
    node.resolve_conflicts();

    let seed = node.ledger.lock().unwrap().last_block().hash();
    debug!("Starting leader election over seed {:?}", seed);

    let mut submissions = vec![node.identity().sign_seed(&seed, node.node_address())];

    for peer in node.nodes() {
        if node.request_peer(&peer, &Request::Ping).is_none() {
            debug!("Candidate {:?} unreachable, dropping it from the registry", peer);
            node.peers.lock().unwrap().remove(&peer);
            continue;
        }

        match node.request_peer(&peer, &Request::LeaderElectionVrf { seed: seed.clone() }) {
            Some(Response::Vrf { submission, .. }) => submissions.push(submission),
            Some(other) => debug!("Unexpected election reply from {:?}: {:?}", peer, other),
            None => debug!("No election submission from {:?}", peer),
        }
    }

    let verified: Vec<Submission> = submissions
        .into_iter()
        .filter(|submission| match submission.verify(&seed) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Discarding election submission from {:?}: {}",
                    submission.candidate, e
                );
                false
            }
        })
        .collect();

    let winner = select_winner(&verified).map(|submission| submission.candidate.clone());

    match &winner {
        Some(candidate) => info!("Elected {:?} as leader", candidate),
        None => warn!("No election submission verified, leaving leadership open"),
    }

    node.set_leader(winner.clone());

    if announce {
        if let Some(leader) = &winner {
            node.broadcast(&Request::ElectLeader {
                leader: leader.clone(),
            });
        }
    }

    winner
}

/// The candidate whose output hash is lexicographically smallest; equal
/// outputs (which do not occur with distinct keys) fall back to the
/// candidate address.
pub fn select_winner(submissions: &[Submission]) -> Option<&Submission> {
    submissions.iter().min_by(|a, b| {
        a.output_hash
            .cmp(&b.output_hash)
            .then_with(|| a.candidate.cmp(&b.candidate))
    })
}
