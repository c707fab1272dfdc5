/// The wire message types and their JSON codec.
pub mod codec;

/// A node of the ledger network. This is where listening, broadcasting
/// and the background schedulers live.
pub mod node;

/// The registry of known peers and their failure counters.
pub mod peer;

/// One-shot TCP exchanges with a fixed deadline.
pub mod transport;
