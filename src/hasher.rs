use crate::consts::{HASH_LEN, LEAF_PREFIX, ZERO_HASH};
use crate::Hash;

/// 256-bit digest capability. Domain separation is the caller's business:
/// node hashes pass their prefix byte as the first part.
pub trait Hasher {
    fn new() -> Self;

    /// Digest of the concatenation of `parts`.
    fn hash(&self, parts: &[&[u8]]) -> Hash;

    /// Sentinel hash of an empty subtree.
    fn zero_hash(&self) -> Hash {
        ZERO_HASH
    }

    fn size(&self) -> usize {
        HASH_LEN
    }
}

/// SHA-256, the default hasher.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256;

impl Hasher for Sha256 {
    fn new() -> Self {
        Sha256
    }

    fn hash(&self, parts: &[&[u8]]) -> Hash {
        use sha2::Digest;
        let mut hasher = sha2::Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Sha3;

impl Hasher for Sha3 {
    fn new() -> Self {
        Sha3
    }

    fn hash(&self, parts: &[&[u8]]) -> Hash {
        use sha3::Digest;
        let mut hasher = sha3::Sha3_256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3;

impl Hasher for Blake3 {
    fn new() -> Self {
        Blake3
    }

    fn hash(&self, parts: &[&[u8]]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }
}

/// Leaf hash: `H(0x00 ‖ key ‖ H(value))`.
pub fn leaf_hash<H: Hasher>(hasher: &H, key: &Hash, value: &[u8]) -> Hash {
    let value_hash = hasher.hash(&[value]);
    hasher.hash(&[&[LEAF_PREFIX], &key[..], &value_hash[..]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hasher = Sha256::new();
        let digest = hasher.hash(&[b"abc"]);
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_multi_part_equals_concat() {
        let hasher = Sha256::new();
        assert_eq!(hasher.hash(&[b"ab", b"c"]), hasher.hash(&[b"abc"]));
    }

    #[test]
    fn test_zero_hash() {
        assert_eq!(Sha256::new().zero_hash(), [0u8; HASH_LEN]);
        assert_eq!(Blake3::new().size(), HASH_LEN);
    }

    #[test]
    fn test_hashers_disagree() {
        let input: &[&[u8]] = &[b"merklog"];
        let a = Sha256::new().hash(input);
        let b = Sha3::new().hash(input);
        let c = Blake3::new().hash(input);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }
}
