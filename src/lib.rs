/// Core ledger: blocks, transactions, unspent outputs, difficulty and the engine
pub mod core;

/// Hashes, keys, addresses and wallet files
pub mod crypto;

/// Node runtime: mempool, transport, sync, mining and message dispatch
pub mod node;
