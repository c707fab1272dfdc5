/// The request dispatcher: business logic behind every wire message.
pub mod engine;

/// The verifiable-random-function leader election.
pub mod election;

/// Leader-only block mining and the quorum vote round.
pub mod proposer;
