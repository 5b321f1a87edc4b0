//! # merklog
//!
//! An authenticated key-value store over a sparse binary Merkle trie with
//! 256-bit hashed keys (an "urkel tree"), persisted in an append-only log.
//!
//! Every committed state has a root hash committing to all entries. The tree
//! produces compact proofs of membership, non-membership and collision that
//! verify against the root hash alone, and recovers the latest committed
//! state when reopened after a crash.
//!
//! Writes go through a [`Transaction`] that rebuilds only the touched paths
//! and shares every untouched subtree with the previous root; reads go
//! through [`Snapshot`]s pinned to a committed root. Storage backends
//! implement [`Store`]: an append-only file log ([`FileStore`]), an
//! in-memory log ([`MemoryStore`]), or sled behind the `db_sled` feature.
//!
//! ```
//! use merklog::{Hasher, MemoryStore, ProofCode, Sha256, Tree};
//!
//! # fn main() -> merklog::Result<()> {
//! let mut tree: Tree = Tree::open(MemoryStore::new())?;
//!
//! let mut tx = tree.transaction();
//! tx.set(b"name-0", b"value-0")?;
//! let root = tx.commit()?;
//!
//! let snapshot = tree.snapshot();
//! assert_eq!(snapshot.get(b"name-0")?, Some(b"value-0".to_vec()));
//!
//! let hasher = Sha256::new();
//! let proof = snapshot.proof(b"name-0")?;
//! let result = proof.verify(&root, &hasher.hash(&[b"name-0"]), &hasher, 256);
//! assert_eq!(result.code, ProofCode::Ok);
//! # Ok(())
//! # }
//! ```

pub mod consts;
pub mod errors;
pub mod filestore;
pub mod hasher;
pub mod meta;
pub mod node;
pub mod proof;
pub mod store;
pub mod tree;
pub mod utils;

pub use crate::errors::{Error, Result};
pub use crate::filestore::FileStore;
pub use crate::hasher::{Blake3, Hasher, Sha256, Sha3};
pub use crate::proof::{Proof, ProofCode, ProofResult, ProofType};
pub use crate::store::{MemoryStore, Store};
pub use crate::tree::{Snapshot, Transaction, Tree};

use crate::consts::HASH_LEN;

/// A 256-bit digest: node hashes and trie keys alike.
pub type Hash = [u8; HASH_LEN];
