use sha2::{Digest, Sha256};

use crate::crypto::Hash;

/// Merkle root over the stamp hashes of a block's transactions. An odd layer
/// duplicates its last node; an empty transaction list roots at zero.
pub fn merkle_root(tx_hashes: &[Hash]) -> Hash {
    if tx_hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut layer: Vec<[u8; 32]> = tx_hashes
        .iter()
        .map(|tx_hash| {
            let mut hasher = Sha256::new();
            hasher.update(tx_hash.dump_buf());
            hasher.finalize().into()
        })
        .collect();

    while layer.len() > 1 {
        if layer.len() % 2 != 0 {
            layer.push(layer[layer.len() - 1]);
        }

        layer = layer
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(pair[1]);
                hasher.finalize().into()
            })
            .collect();
    }

    Hash::new_from_buf(layer[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_hash(byte: u8) -> Hash {
        Hash::new_from_buf([byte; 32])
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_root_depends_on_content() {
        let a: Vec<Hash> = (1..=4).map(dummy_hash).collect();
        let mut b = a.clone();
        b[2] = dummy_hash(99);

        assert_eq!(merkle_root(&a), merkle_root(&a));
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn test_root_depends_on_order() {
        let forward: Vec<Hash> = (1..=3).map(dummy_hash).collect();
        let mut backward = forward.clone();
        backward.reverse();

        assert_ne!(merkle_root(&forward), merkle_root(&backward));
    }

    #[test]
    fn test_single_transaction_root() {
        let single = [dummy_hash(7)];
        assert_ne!(merkle_root(&single), Hash::ZERO);
        assert_ne!(merkle_root(&single), single[0]);
    }
}
