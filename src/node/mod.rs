/// The node: owns the engine, the transport and the long lived tasks
pub mod node;

/// Stores all currently pending transactions, waiting to be mined
pub mod mempool;

/// Wire format of fan-out messages
pub mod message;

/// Routes inbound messages and stored blocks
pub mod dispatcher;

/// Pulls successor blocks from the network and applies them
pub mod sync;

/// Proof-of-work search over mining candidates
pub mod miner;

/// Contract with the overlay network
pub mod transport;

/// Mining throughput counters
pub mod stats;
