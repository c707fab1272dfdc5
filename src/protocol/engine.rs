use crate::chain::block::Block;
use crate::chain::ledger::Ledger;
use crate::chain::transaction::Transaction;
use crate::p2p::codec::{DataReply, Request, Response};
use crate::p2p::node::Node;

/// A protocol handler implements the business logic of what should
/// happen when a message is received, either from other running nodes
/// or from client applications. The returned message is the direct
/// response to the sender.
pub trait ProtocolHandler {
    fn handle(&self, request: Request) -> Response;
}

impl ProtocolHandler for Node {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok_message("Alive"),

            Request::RegisterNode {
                node,
                election_start_time,
            } => self.handle_register(node, election_start_time),

            Request::GetChain => Response::Data(DataReply::Chain { chain: self.chain() }),

            Request::GetPending => Response::Data(DataReply::Pending {
                pending: self.pending(),
            }),

            Request::GetNodes => Response::Data(DataReply::Nodes { nodes: self.nodes() }),

            Request::DiscoverPeers => Response::Data(DataReply::Peers { nodes: self.nodes() }),

            Request::GetLeader => Response::Data(DataReply::Leader {
                leader: self.current_leader(),
            }),

            Request::NewTransaction {
                transaction,
                sender,
                recipient,
                amount,
            } => self.handle_new_transaction(transaction, sender, recipient, amount),

            Request::LeaderElectionVrf { seed } => Response::Vrf {
                status: "OK".to_string(),
                submission: self.identity().sign_seed(&seed, self.node_address()),
            },

            Request::ElectLeader { leader } => {
                info!("Following leader {:?} announced by a peer", leader);
                self.set_leader(Some(leader.clone()));
                Response::ok_message(format!("Leader set to {}", leader))
            }

            Request::BlockPropose { block } => self.handle_propose(block),

            Request::BlockCommit { block } => self.handle_commit(block),

            Request::NewBlock { block } => self.handle_new_block(block),
        }
    }
}

impl Node {
    fn handle_register(&self, node: String, election_start_time: Option<f64>) -> Response {
        match self.peers.lock().unwrap().register(&node) {
            Ok(added) => {
                if added {
                    info!("Registered peer {:?}", node);
                }
                if let Some(anchor) = election_start_time {
                    self.adopt_election_start_time(anchor);
                }

                Response::Registered {
                    status: "OK".to_string(),
                    message: format!("Node {} registered.", node),
                    election_start_time: self.election_start_time(),
                }
            }
            Err(e) => Response::error(e.to_string()),
        }
    }

    fn handle_new_transaction(
        &self,
        transaction: Option<Transaction>,
        sender: Option<String>,
        recipient: Option<String>,
        amount: Option<f64>,
    ) -> Response {
        // gossip between nodes carries the full transaction; only the
        // first sighting travels onwards
        if let Some(transaction) = transaction {
            let admitted = self
                .ledger
                .lock()
                .unwrap()
                .ingest_transaction(transaction.clone());
            if admitted {
                debug!("Admitted gossiped transaction {}", transaction.id);
                self.broadcast(&Request::gossip_transaction(transaction));
            }

            return Response::ok_message("Transaction will be added.");
        }

        // client submissions carry the bare field triple
        match (sender, recipient, amount) {
            (Some(sender), Some(recipient), Some(amount)) => {
                match self.submit_transaction(&sender, &recipient, amount) {
                    Ok(index) => Response::ok_message(format!(
                        "Transaction will be added to Block {}",
                        index
                    )),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            _ => Response::error("Missing transaction fields."),
        }
    }

    /// Vote on a leader's proposal: approve iff the block extends our
    /// tip with a valid proof of work.
    fn handle_propose(&self, block: Block) -> Response {
        let ledger = self.ledger.lock().unwrap();
        let last = ledger.last_block();
        let last_hash = last.hash();

        let approve = block.index == last.index + 1
            && block.previous_hash == last_hash
            && Ledger::valid_proof(last.nonce, block.nonce, &last_hash, block.difficulty);

        debug!(
            "Voting {} on proposed block {}",
            if approve { "approve" } else { "reject" },
            block.index
        );

        Response::vote(approve)
    }

    /// Apply a quorum-approved block. A commit that is ahead of our tip
    /// means we missed earlier blocks, so we sync instead; any other
    /// mismatch is dropped for the next sync to repair.
    fn handle_commit(&self, block: Block) -> Response {
        let behind = {
            let mut ledger = self.ledger.lock().unwrap();
            let (expected_index, last_hash) = {
                let last = ledger.last_block();
                (last.index + 1, last.hash())
            };

            if block.index == expected_index && block.previous_hash == last_hash {
                ledger.append_committed(block);
                return Response::committed();
            }

            block.index > expected_index
        };

        if behind {
            info!(
                "Commit for block {} is ahead of our tip, resolving conflicts",
                block.index
            );
            self.resolve_conflicts();
            return Response::committed();
        }

        debug!("Dropping commit for block {}: does not extend our tip", block.index);
        Response::commit_error()
    }

    /// Legacy direct-append path: accepted only when it advances the
    /// chain by exactly one fully valid block.
    fn handle_new_block(&self, block: Block) -> Response {
        let behind = {
            let mut ledger = self.ledger.lock().unwrap();
            let (expected_index, last_nonce, last_hash) = {
                let last = ledger.last_block();
                (last.index + 1, last.nonce, last.hash())
            };

            if block.index == expected_index
                && block.previous_hash == last_hash
                && Ledger::valid_proof(last_nonce, block.nonce, &last_hash, block.difficulty)
            {
                ledger.append_committed(block);
                return Response::ok_message("Block accepted.");
            }

            block.index > expected_index
        };

        if behind {
            info!(
                "Block {} indicates our chain might be behind, resolving conflicts",
                block.index
            );
            self.resolve_conflicts();
            return Response::ok_message("Chain synchronized with peers.");
        }

        Response::error("Invalid block.")
    }
}
