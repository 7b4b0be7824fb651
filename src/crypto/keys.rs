use bincode::{Decode, Encode};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::crypto::Hash;

/// A private signing key
#[derive(Clone)]
pub struct Private(SigningKey);

impl Private {
    pub fn new_random() -> Private {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Private(SigningKey::from_bytes(&seed))
    }

    pub fn new_from_buf(buf: [u8; 32]) -> Private {
        Private(SigningKey::from_bytes(&buf))
    }

    pub fn dump_buf(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_public(&self) -> Public {
        Public(self.0.verifying_key().to_bytes())
    }

    /// Sign a content hash, returns the raw signature bytes
    pub fn sign(&self, hash: &Hash) -> Vec<u8> {
        self.0.sign(&hash.dump_buf()).to_bytes().to_vec()
    }
}

/// A public key. Its sanitized form doubles as the address coins are paid to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Public([u8; 32]);

impl Public {
    pub fn new_from_buf(buf: [u8; 32]) -> Public {
        Public(buf)
    }

    pub fn dump_buf(&self) -> [u8; 32] {
        self.0
    }

    /// Check a signature made by this key over a content hash
    pub fn verify(&self, sig: &[u8], hash: &Hash) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(sig) else {
            return false;
        };
        key.verify(&hash.dump_buf(), &signature).is_ok()
    }
}

/// Canonical textual form of a public key. Every address-keyed mapping in the
/// ledger must be keyed through this function.
pub fn sanitize(public: &Public) -> String {
    hex::encode(public.dump_buf())
}
