//! Compact Merkle proofs, verifiable against a root hash alone.
//!
//! A proof records the sibling hashes along one key's walk (root to leaf)
//! plus a payload describing what the walk ended on: the key's own leaf, a
//! colliding leaf, or an empty subtree.

use crate::consts::{INTERNAL_PREFIX, LEAF_PREFIX};
use crate::hasher::{leaf_hash, Hasher};
use crate::utils::bit;
use crate::Hash;

/// What the walk found at the end of the key's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofType {
    /// The path ends in an empty subtree: the key is absent.
    Deadend,
    /// The path ends at a leaf holding a different key: absent by collision.
    Collision,
    /// The path ends at the key's own leaf.
    Exists,
}

/// Verification outcome. Returned, never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofCode {
    Ok,
    HashMismatch,
    SameKey,
    UnknownError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofResult {
    pub code: ProofCode,
    /// The proven value for an `Exists` proof that verified; `None` otherwise.
    pub value: Option<Vec<u8>>,
}

impl ProofResult {
    fn of(code: ProofCode) -> Self {
        ProofResult { code, value: None }
    }
}

#[derive(Clone, Debug)]
pub struct Proof {
    pub proof_type: ProofType,
    /// Sibling hashes in walk order, at most one per key bit.
    pub node_hashes: Vec<Hash>,
    /// Collision only: the colliding leaf's key.
    pub key: Option<Hash>,
    /// Collision only: the hash of the colliding leaf's value.
    pub hash: Option<Hash>,
    /// Exists only.
    pub value: Option<Vec<u8>>,
}

impl Proof {
    pub fn new() -> Self {
        Proof {
            proof_type: ProofType::Deadend,
            node_hashes: Vec::new(),
            key: None,
            hash: None,
            value: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.node_hashes.len()
    }

    pub fn push(&mut self, hash: Hash) {
        self.node_hashes.push(hash);
    }

    /// Per-shape structural checks, done before any hashing.
    fn is_sane(&self, bits: usize) -> bool {
        if self.depth() > bits {
            return false;
        }
        match self.proof_type {
            ProofType::Deadend => {
                self.key.is_none() && self.hash.is_none() && self.value.is_none()
            }
            ProofType::Collision => {
                self.key.is_some() && self.hash.is_some() && self.value.is_none()
            }
            ProofType::Exists => {
                self.key.is_none()
                    && self.hash.is_none()
                    && self.value.as_ref().map_or(false, |v| v.len() <= 0xffff)
            }
        }
    }

    /// Rebuild the root from the proof and compare it to `root`. `key` is the
    /// 32-byte trie key the proof was generated for; `bits` is the key size
    /// in bits (256 for this tree).
    pub fn verify<H: Hasher>(&self, root: &Hash, key: &Hash, hasher: &H, bits: usize) -> ProofResult {
        if !self.is_sane(bits) {
            return ProofResult::of(ProofCode::UnknownError);
        }

        let mut next = match self.proof_type {
            ProofType::Deadend => hasher.zero_hash(),
            ProofType::Collision => {
                let (Some(other_key), Some(other_hash)) = (&self.key, &self.hash) else {
                    return ProofResult::of(ProofCode::UnknownError);
                };
                if other_key == key {
                    return ProofResult::of(ProofCode::SameKey);
                }
                hasher.hash(&[&[LEAF_PREFIX], &other_key[..], &other_hash[..]])
            }
            ProofType::Exists => match &self.value {
                Some(value) => leaf_hash(hasher, key, value),
                None => return ProofResult::of(ProofCode::UnknownError),
            },
        };

        for (depth, sibling) in self.node_hashes.iter().enumerate().rev() {
            next = if bit(key, depth) {
                hasher.hash(&[&[INTERNAL_PREFIX], &sibling[..], &next[..]])
            } else {
                hasher.hash(&[&[INTERNAL_PREFIX], &next[..], &sibling[..]])
            };
        }

        if next != *root {
            return ProofResult::of(ProofCode::HashMismatch);
        }
        ProofResult {
            code: ProofCode::Ok,
            value: self.value.clone(),
        }
    }
}

impl Default for Proof {
    fn default() -> Self {
        Self::new()
    }
}
