/// The bootstrap configuration of a node.
///
/// Must be fully known before the node starts listening: the listen
/// address doubles as the node's identity in leader elections, and the
/// seed peers are contacted once during boot.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The host on which the node listens for incoming messages.
    pub host: String,

    /// The TCP port on which the node listens for incoming messages.
    pub port: u16,

    /// Addresses of peers to register with on startup, in `host:port` form.
    pub peers: Vec<String>,
}

impl NodeConfig {
    /// Create a new configuration.
    ///
    /// - `host`: The listen host.
    /// - `port`: The listen port.
    /// - `peers`: A comma-separated list of seed peer addresses. Empty
    ///            entries are skipped, surrounding whitespace is trimmed.
    pub fn new(host: &str, port: u16, peers: &str) -> Self {
        let peers = peers
            .split(',')
            .map(str::trim)
            .filter(|peer| !peer.is_empty())
            .map(str::to_string)
            .collect();

        NodeConfig {
            host: host.to_string(),
            port,
            peers,
        }
    }

    /// The `host:port` address under which this node is known to its peers.
    pub fn node_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod config_test {
    use super::NodeConfig;

    #[test]
    fn test_peer_list_parsing() {
        let config = NodeConfig::new("127.0.0.1", 5000, "127.0.0.1:5001, 127.0.0.1:5002 ,,");

        assert_eq!(config.peers, vec!["127.0.0.1:5001", "127.0.0.1:5002"]);
        assert_eq!(config.node_address(), "127.0.0.1:5000");
    }

    #[test]
    fn test_empty_peer_list() {
        let config = NodeConfig::new("0.0.0.0", 5000, "");

        assert!(config.peers.is_empty());
    }
}
