use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32 byte value. Equality and ordering are byte-wise, which makes a hash
/// directly comparable to a target interpreted as a big-endian integer.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn new_from_buf(buf: [u8; 32]) -> Hash {
        Hash(buf)
    }

    /// SHA-256 of arbitrary bytes
    pub fn digest(data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    pub fn dump_buf(&self) -> [u8; 32] {
        self.0
    }

    pub fn dump_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// A hash meets a target when it does not exceed it, byte-wise big-endian
    pub fn meets_target(&self, target: &[u8; 32]) -> bool {
        self.0 <= *target
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.dump_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dump_hex())
    }
}
