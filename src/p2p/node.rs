use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chain::block::Block;
use crate::chain::ledger::{Ledger, LedgerError};
use crate::chain::transaction::Transaction;
use crate::config::NodeConfig;
use crate::crypto::Identity;
use crate::p2p::codec::{DataReply, JsonCodec, Request, Response};
use crate::p2p::peer::PeerRegistry;
use crate::p2p::transport;
use crate::protocol::election;
use crate::protocol::engine::ProtocolHandler;
use crate::protocol::proposer;

/// Pace of the chain/peer/pending synchronization loop.
pub const SYNC_PERIOD: Duration = Duration::from_secs(5);

/// Pace of the leader liveness probe.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(5);

/// Seconds since the epoch as a float, the clock all schedulers share.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs_f64()
}

/// Forms a node in the ledger network.
///
/// A node owns the ledger store, the peer registry and the election
/// state, and shares them between the dispatcher (one thread per
/// incoming connection) and the background schedulers. Mutations go
/// through the mutexes below; no lock is ever held across a network
/// call.
pub struct Node {
    config: NodeConfig,

    /// The `host:port` identity under which this node competes in
    /// leader elections and registers with its peers.
    node_address: String,

    /// The ephemeral election key pair generated at boot.
    identity: Identity,

    pub(crate) ledger: Mutex<Ledger>,

    pub(crate) peers: Mutex<PeerRegistry>,

    /// The leader this node currently follows, if any.
    pub(crate) current_leader: Mutex<Option<String>>,

    /// Anchor of the shared election epoch grid: the minimum boot time
    /// this node has negotiated with its peers so far.
    pub(crate) election_start_time: Mutex<f64>,

    /// Guards against re-entrant election rounds.
    pub(crate) election_in_progress: AtomicBool,
}

impl Node {
    /// Create a new node with a fresh ledger and election identity.
    pub fn new(config: NodeConfig) -> Arc<Node> {
        let node_address = config.node_address();

        Arc::new(Node {
            config,
            node_address: node_address.clone(),
            identity: Identity::generate(),
            ledger: Mutex::new(Ledger::new()),
            peers: Mutex::new(PeerRegistry::new(node_address)),
            current_leader: Mutex::new(None),
            election_start_time: Mutex::new(unix_now()),
            election_in_progress: AtomicBool::new(false),
        })
    }

    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The committed chain, genesis first.
    pub fn chain(&self) -> Vec<Block> {
        self.ledger.lock().unwrap().chain_snapshot()
    }

    /// The pool of pending transactions, in insertion order.
    pub fn pending(&self) -> Vec<Transaction> {
        self.ledger.lock().unwrap().pending_snapshot()
    }

    /// The currently known peer addresses.
    pub fn nodes(&self) -> Vec<String> {
        self.peers.lock().unwrap().snapshot()
    }

    pub fn current_leader(&self) -> Option<String> {
        self.current_leader.lock().unwrap().clone()
    }

    pub(crate) fn set_leader(&self, leader: Option<String>) {
        *self.current_leader.lock().unwrap() = leader;
    }

    pub fn election_start_time(&self) -> f64 {
        *self.election_start_time.lock().unwrap()
    }

    /// Move the epoch grid anchor back if a peer reports an earlier one.
    pub(crate) fn adopt_election_start_time(&self, other: f64) {
        let mut own = self.election_start_time.lock().unwrap();
        if other < *own {
            debug!("Adopting earlier election anchor {} from peer", other);
            *own = other;
        }
    }

    /// Accept a client transaction, then gossip it to every peer.
    /// Returns the index of the block that will hold it.
    pub fn submit_transaction(
        &self,
        sender: &str,
        recipient: &str,
        amount: f64,
    ) -> Result<u64, LedgerError> {
        let (index, transaction) =
            self.ledger
                .lock()
                .unwrap()
                .submit_transaction(sender, recipient, amount)?;

        info!(
            "Transaction {} will be added to block {}",
            transaction.id, index
        );
        self.broadcast(&Request::gossip_transaction(transaction));

        Ok(index)
    }

    /// Run the proposer: mine and commit a block if this node leads and
    /// transactions are waiting.
    pub fn mine_block(&self) -> Option<Block> {
        proposer::mine_block(self)
    }

    /// Run one election round locally without announcing the winner.
    pub fn elect_leader(&self) -> Option<String> {
        election::elect_leader(self)
    }

    /// Run one election round and announce the winner to every peer.
    pub fn broadcast_election(&self) -> Option<String> {
        election::broadcast_election(self)
    }

    /// Ask every peer for its chain and adopt the heaviest valid one.
    /// Returns whether the local chain was replaced.
    pub fn resolve_conflicts(&self) -> bool {
        let genesis_hash = self.ledger.lock().unwrap().genesis_hash();
        let mut best: Option<(u64, Vec<Block>)> = None;

        for peer in self.nodes() {
            let chain = match self.request_peer(&peer, &Request::GetChain) {
                Some(Response::Data(DataReply::Chain { chain })) => chain,
                _ => continue,
            };

            if !Ledger::valid_chain(&chain) {
                debug!("Ignoring invalid chain offered by {:?}", peer);
                continue;
            }

            if chain[0].hash() != genesis_hash {
                debug!("Ignoring chain from {:?}: genesis differs from ours", peer);
                continue;
            }

            let work = Ledger::cumulative_work(&chain);
            if best.as_ref().map_or(true, |(best_work, _)| work > *best_work) {
                best = Some((work, chain));
            }
        }

        match best {
            Some((_, chain)) => self.ledger.lock().unwrap().try_adopt(chain),
            None => false,
        }
    }

    /// Pull the peer lists of all known peers and admit any candidate
    /// that answers a ping. A peer that fails the discovery call itself
    /// is dropped.
    pub fn discover_peers(&self) {
        for peer in self.nodes() {
            let candidates = match self.request_peer(&peer, &Request::DiscoverPeers) {
                Some(Response::Data(DataReply::Peers { nodes })) => nodes,
                Some(other) => {
                    debug!("Unexpected discovery reply from {:?}: {:?}", peer, other);
                    continue;
                }
                None => {
                    debug!("Peer {:?} failed discovery, removing it", peer);
                    self.peers.lock().unwrap().remove(&peer);
                    continue;
                }
            };

            for candidate in candidates {
                if candidate == self.node_address
                    || self.peers.lock().unwrap().contains(&candidate)
                {
                    continue;
                }

                if transport::exchange(&candidate, &Request::Ping).is_none() {
                    trace!("Discovered candidate {:?} did not answer a ping", candidate);
                    continue;
                }

                match self.peers.lock().unwrap().register(&candidate) {
                    Ok(true) => info!("Discovered new peer {:?} via {:?}", candidate, peer),
                    Ok(false) => {}
                    Err(e) => debug!("Ignoring discovered address: {}", e),
                }
            }
        }
    }

    /// Send a request expecting a reply, maintaining the peer's failure
    /// counter: any reply resets it, any transport failure counts one
    /// strike towards eviction.
    pub(crate) fn request_peer(&self, address: &str, request: &Request) -> Option<Response> {
        match transport::exchange(address, request) {
            Some(response) => {
                self.peers.lock().unwrap().record_success(address);
                Some(response)
            }
            None => {
                self.peers.lock().unwrap().record_failure(address);
                None
            }
        }
    }

    /// Fire-and-forget variant of [`Node::request_peer`].
    pub(crate) fn notify_peer(&self, address: &str, request: &Request) -> bool {
        if transport::send_oneway(address, request) {
            self.peers.lock().unwrap().record_success(address);
            true
        } else {
            self.peers.lock().unwrap().record_failure(address);
            false
        }
    }

    /// Gossip a request to every known peer, fire-and-forget.
    pub(crate) fn broadcast(&self, request: &Request) {
        for peer in self.nodes() {
            if !self.notify_peer(&peer, request) {
                warn!("Failed to reach {:?} while broadcasting", peer);
            }
        }
    }

    /// Bind the listen address and start serving requests, one thread
    /// per incoming connection. Returns the bound address.
    pub fn start(self: &Arc<Self>) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        let local_address = listener.local_addr()?;
        info!("Listening for incoming connections on {}", local_address);

        let node = Arc::clone(self);
        thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => {
                            let node = Arc::clone(&node);
                            thread::spawn(move || handle_connection(node, stream));
                        }
                        Err(e) => warn!("Failed to accept incoming connection: {:?}", e),
                    }
                }
            })?;

        Ok(local_address)
    }

    /// Register with the seed peers, adopt the earliest election anchor,
    /// sync the chain, then either follow an existing leader or run the
    /// first election.
    pub fn bootstrap(&self) {
        for peer in self.config.peers.clone() {
            if let Err(e) = self.peers.lock().unwrap().register(&peer) {
                warn!("Skipping seed peer: {}", e);
                continue;
            }

            let request = Request::RegisterNode {
                node: self.node_address.clone(),
                election_start_time: Some(self.election_start_time()),
            };
            match self.request_peer(&peer, &request) {
                Some(Response::Registered {
                    election_start_time,
                    ..
                }) => {
                    info!("Registered with peer {:?}", peer);
                    self.adopt_election_start_time(election_start_time);
                }
                Some(other) => warn!("Peer {:?} rejected registration: {:?}", peer, other),
                None => warn!("Could not register with peer {:?}", peer),
            }
        }

        self.resolve_conflicts();

        for peer in self.nodes() {
            if let Some(Response::Data(DataReply::Leader {
                leader: Some(leader),
            })) = self.request_peer(&peer, &Request::GetLeader)
            {
                info!("Following current leader {:?} reported by {:?}", leader, peer);
                self.set_leader(Some(leader));
                return;
            }
        }

        self.broadcast_election();
    }

    /// Start the periodic sync loop, the election scheduler and the
    /// leader watchdog. Each runs for the lifetime of the process.
    pub fn spawn_schedulers(self: &Arc<Self>) {
        let node = Arc::clone(self);
        thread::Builder::new()
            .name("sync".to_string())
            .spawn(move || loop {
                thread::sleep(SYNC_PERIOD);
                node.resolve_conflicts();
                node.discover_peers();
                node.pull_pending();
            })
            .expect("failed to spawn sync scheduler");

        let node = Arc::clone(self);
        thread::Builder::new()
            .name("election".to_string())
            .spawn(move || loop {
                thread::sleep(node.time_to_next_election());
                node.broadcast_election();
            })
            .expect("failed to spawn election scheduler");

        let node = Arc::clone(self);
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || loop {
                thread::sleep(WATCHDOG_PERIOD);
                node.check_leader_liveness();
            })
            .expect("failed to spawn leader watchdog");
    }

    /// Bind, bootstrap and start the schedulers. The call returns once
    /// the node is serving; the background threads keep it alive.
    pub fn run(self: &Arc<Self>) -> std::io::Result<SocketAddr> {
        let address = self.start()?;
        self.bootstrap();
        self.spawn_schedulers();

        Ok(address)
    }

    /// Time until the next boundary of the election epoch grid.
    fn time_to_next_election(&self) -> Duration {
        let period = election::ELECTION_PERIOD_SECS as f64;
        let anchor = self.election_start_time();
        let now = unix_now();
        let elapsed = (now - anchor).max(0.0);
        let next = anchor + ((elapsed / period).floor() + 1.0) * period;

        Duration::from_secs_f64((next - now).max(0.0))
    }

    /// Ping the current leader; on failure, elect a replacement at once.
    fn check_leader_liveness(&self) {
        let leader = match self.current_leader() {
            Some(leader) if leader != self.node_address => leader,
            _ => return,
        };

        if self.request_peer(&leader, &Request::Ping).is_none() {
            warn!(
                "Leader {:?} failed its liveness probe, starting an election",
                leader
            );
            self.broadcast_election();
        }
    }

    /// Merge the pending pools of all peers into the local one, then
    /// drop anything that is already committed.
    fn pull_pending(&self) {
        for peer in self.nodes() {
            if let Some(Response::Data(DataReply::Pending { pending })) =
                self.request_peer(&peer, &Request::GetPending)
            {
                let mut ledger = self.ledger.lock().unwrap();
                for transaction in pending {
                    ledger.ingest_transaction(transaction);
                }
            }
        }

        self.ledger.lock().unwrap().cleanup_pending();
    }
}

/// Serve a single connection: read one request line, dispatch it, write
/// one reply line, close.
fn handle_connection(node: Arc<Node>, stream: TcpStream) {
    if stream.set_read_timeout(Some(transport::SOCKET_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(transport::SOCKET_TIMEOUT)).is_err()
    {
        return;
    }

    let peer_address = stream.peer_addr().ok();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    match reader.read_line(&mut line) {
        Ok(0) => {
            trace!("Connection from {:?} closed without data", peer_address);
            return;
        }
        Ok(_) => {}
        Err(e) => {
            trace!("Failed to read from {:?}: {:?}", peer_address, e);
            return;
        }
    }

    let response = match JsonCodec::decode::<Request>(&line) {
        Some(request) => {
            trace!("Got request {:?} from {:?}", request, peer_address);
            node.handle(request)
        }
        None => Response::error("Unknown message type."),
    };

    if let Some(mut encoded) = JsonCodec::encode(&response) {
        encoded.push('\n');
        let mut stream = reader.into_inner();
        if let Err(e) = stream
            .write_all(encoded.as_bytes())
            .and_then(|_| stream.flush())
        {
            trace!("Failed to reply to {:?}: {:?}", peer_address, e);
        }
    }
}
