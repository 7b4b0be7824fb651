/// The 32 byte hash primitive and its ordering
pub mod hash;

/// Private and public keys, signatures, and the address form of a public key
pub mod keys;

/// Named keypairs stored as `*.key` files in the node folder
pub mod wallets;

/// Merkle root over the transactions of a block
pub mod merkle_tree;

pub use hash::Hash;
