use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Consecutive send failures a peer may accumulate before it is
/// discarded from the registry.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("address {0:?} must be in host:port format")]
    InvalidAddress(String),
}

/// The set of peer addresses a node knows about, together with a
/// consecutive-failure counter per peer.
///
/// Peers enter the set only through explicit registration or discovery;
/// a previously evicted peer that becomes reachable again is not re-added
/// until one of those paths runs for it.
pub struct PeerRegistry {
    self_address: String,
    peers: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl PeerRegistry {
    pub fn new(self_address: String) -> Self {
        PeerRegistry {
            self_address,
            peers: HashSet::new(),
            failures: HashMap::new(),
        }
    }

    /// Add a peer address.
    ///
    /// Addresses without a `:` separator are rejected; the node's own
    /// address is silently dropped. Returns whether the address is newly
    /// added.
    pub fn register(&mut self, address: &str) -> Result<bool, PeerError> {
        if !address.contains(':') {
            return Err(PeerError::InvalidAddress(address.to_string()));
        }

        if address == self.self_address {
            trace!("Not registering own address {:?} as peer", address);
            return Ok(false);
        }

        Ok(self.peers.insert(address.to_string()))
    }

    /// Drop a peer and forget its failure history.
    pub fn remove(&mut self, address: &str) -> bool {
        self.failures.remove(address);
        self.peers.remove(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.contains(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }

    /// Count one send failure against the peer. On the third consecutive
    /// failure the peer is discarded and its counter cleared; returns
    /// whether that eviction happened.
    pub fn record_failure(&mut self, address: &str) -> bool {
        if !self.peers.contains(address) {
            return false;
        }

        let count = self.failures.entry(address.to_string()).or_insert(0);
        *count += 1;

        if *count >= MAX_CONSECUTIVE_FAILURES {
            info!(
                "Removing peer {:?} after {} consecutive failures",
                address, MAX_CONSECUTIVE_FAILURES
            );
            self.remove(address);
            return true;
        }

        false
    }

    /// Reset the failure counter after any successful exchange.
    pub fn record_success(&mut self, address: &str) {
        if self.peers.contains(address) {
            self.failures.remove(address);
        }
    }
}

#[cfg(test)]
mod peer_test {
    use super::PeerRegistry;

    fn registry() -> PeerRegistry {
        PeerRegistry::new("127.0.0.1:5000".to_string())
    }

    #[test]
    fn test_register_validates_and_drops_self() {
        let mut peers = registry();

        assert!(peers.register("127.0.0.1").is_err());
        assert!(!peers.register("127.0.0.1:5000").unwrap());
        assert!(peers.register("127.0.0.1:5001").unwrap());
        assert!(!peers.register("127.0.0.1:5001").unwrap());

        assert_eq!(peers.snapshot(), vec!["127.0.0.1:5001".to_string()]);
    }

    #[test]
    fn test_three_failures_evict() {
        let mut peers = registry();
        peers.register("127.0.0.1:5001").unwrap();

        assert!(!peers.record_failure("127.0.0.1:5001"));
        assert!(!peers.record_failure("127.0.0.1:5001"));
        assert!(peers.record_failure("127.0.0.1:5001"));

        assert!(!peers.contains("127.0.0.1:5001"));
        // success on an evicted address must not re-admit it
        peers.record_success("127.0.0.1:5001");
        assert!(!peers.contains("127.0.0.1:5001"));
    }

    #[test]
    fn test_success_resets_the_counter() {
        let mut peers = registry();
        peers.register("127.0.0.1:5001").unwrap();

        peers.record_failure("127.0.0.1:5001");
        peers.record_failure("127.0.0.1:5001");
        peers.record_success("127.0.0.1:5001");

        // the streak starts over after a success
        assert!(!peers.record_failure("127.0.0.1:5001"));
        assert!(!peers.record_failure("127.0.0.1:5001"));
        assert!(peers.record_failure("127.0.0.1:5001"));
    }
}
