//! Storage backends for the tree.
//!
//! A store persists opaque records addressed by (file index, offset) and
//! knows where the last committed root lives. Writes are staged in a tail
//! buffer that only `commit` makes durable, so a meta discovered by recovery
//! always points at fully persisted subtrees.

use crate::consts::{INTERNAL_SIZE, LEAF_SIZE};
use crate::errors::{Error, Result};
use crate::hasher::{leaf_hash, Hasher, Sha256};
use crate::node::{decode_internal, decode_leaf, HashNode, Node, NodeAddr};

pub trait Store {
    /// Root of the last committed state, or `Node::Null` for a fresh store.
    fn get_root(&self) -> Result<Node>;

    /// Read and decode a single record. Children of a decoded internal come
    /// back as placeholders.
    fn get_node(&self, index: u16, pos: u32, is_leaf: bool) -> Result<Node>;

    fn get_value(&self, index: u16, pos: u32, size: u16) -> Result<Vec<u8>>;

    /// Stage an encoded node in the tail buffer; returns its address.
    fn write_node(&mut self, bytes: &[u8]) -> Result<(u16, u32)>;

    /// Stage raw value bytes in the tail buffer; returns their address.
    fn write_value(&mut self, bytes: &[u8]) -> Result<(u16, u32)>;

    /// Make the staged tail durable together with a meta record pointing at
    /// the new root. `root_index` 0 commits an empty tree.
    fn commit(&mut self, root_index: u16, root_pos: u32, root_is_leaf: bool) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub(crate) fn decode_record(bytes: &[u8], is_leaf: bool) -> Result<Node> {
    if is_leaf {
        Ok(Node::Leaf(decode_leaf(bytes)?))
    } else {
        Ok(Node::Internal(decode_internal(bytes)?))
    }
}

/// Materialize the committed root from its meta address as a placeholder.
/// Records do not carry their own hash: for a leaf root it is recomputed from
/// the stored value, for an internal root it folds the two stored child
/// hashes.
pub(crate) fn load_root<S, H>(
    store: &S,
    hasher: &H,
    index: u16,
    pos: u32,
    is_leaf: bool,
) -> Result<Node>
where
    S: Store + ?Sized,
    H: Hasher,
{
    if index == 0 {
        return Ok(Node::Null);
    }
    let node = store.get_node(index, pos, is_leaf)?;
    let hash = match &node {
        Node::Leaf(leaf) => {
            let value = store.get_value(leaf.vindex, leaf.vpos, leaf.vsize)?;
            leaf_hash(hasher, &leaf.key, &value)
        }
        node => node.hash(hasher),
    };
    Ok(Node::Hash(HashNode {
        hash,
        addr: NodeAddr { index, pos },
        leaf: is_leaf,
    }))
}

/// In-memory backend: the same positional addressing as the file log, minus
/// the files. Useful for tests and ephemeral trees.
#[derive(Debug)]
pub struct MemoryStore<H = Sha256> {
    log: Vec<u8>,
    staged: Vec<u8>,
    root: Option<(u16, u32, bool)>,
    hasher: H,
}

impl<H: Hasher> MemoryStore<H> {
    pub fn new() -> Self {
        MemoryStore {
            log: Vec::new(),
            staged: Vec::new(),
            root: None,
            hasher: H::new(),
        }
    }

    fn read(&self, index: u16, pos: u32, size: usize) -> Result<&[u8]> {
        if index != 1 {
            return Err(Error::NotFound(format!("file index {}", index)));
        }
        let start = pos as usize;
        let end = start + size;
        if end > self.log.len() {
            return Err(Error::NotFound(format!("{} bytes at offset {}", size, pos)));
        }
        Ok(&self.log[start..end])
    }

    fn append(&mut self, bytes: &[u8]) -> (u16, u32) {
        let pos = (self.log.len() + self.staged.len()) as u32;
        self.staged.extend_from_slice(bytes);
        (1, pos)
    }
}

impl<H: Hasher> Default for MemoryStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Hasher> Store for MemoryStore<H> {
    fn get_root(&self) -> Result<Node> {
        match self.root {
            None => Ok(Node::Null),
            Some((index, pos, is_leaf)) => load_root(self, &self.hasher, index, pos, is_leaf),
        }
    }

    fn get_node(&self, index: u16, pos: u32, is_leaf: bool) -> Result<Node> {
        let size = if is_leaf { LEAF_SIZE } else { INTERNAL_SIZE };
        decode_record(self.read(index, pos, size)?, is_leaf)
    }

    fn get_value(&self, index: u16, pos: u32, size: u16) -> Result<Vec<u8>> {
        Ok(self.read(index, pos, size as usize)?.to_vec())
    }

    fn write_node(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
        Ok(self.append(bytes))
    }

    fn write_value(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
        Ok(self.append(bytes))
    }

    fn commit(&mut self, root_index: u16, root_pos: u32, root_is_leaf: bool) -> Result<()> {
        self.log.append(&mut self.staged);
        self.root = Some((root_index, root_pos, root_is_leaf));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.staged.clear();
        Ok(())
    }
}

#[cfg(feature = "db_sled")]
pub mod sled {
    //! Embedded-KV alternative to the file log. Records are keyed by their
    //! 6-byte (index ‖ pos) address; the root meta lives under a reserved
    //! key; writes are staged in a batch applied atomically on commit.

    use std::path::Path;

    use super::{decode_record, load_root, Store};
    use crate::consts::{INTERNAL_SIZE, LEAF_SIZE};
    use crate::errors::{Error, Result};
    use crate::hasher::{Hasher, Sha256};
    use crate::node::Node;
    use crate::utils::{read_u16, read_u32};

    const ROOT_KEY: &[u8] = b"__root__";
    const POS_KEY: &[u8] = b"__pos__";

    fn addr_key(index: u16, pos: u32) -> [u8; 6] {
        let mut key = [0u8; 6];
        key[0..2].copy_from_slice(&index.to_le_bytes());
        key[2..6].copy_from_slice(&pos.to_le_bytes());
        key
    }

    pub struct SledStore<H = Sha256> {
        db: sled::Db,
        batch: sled::Batch,
        pos: u32,
        hasher: H,
    }

    impl<H: Hasher> SledStore<H> {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let db = sled::open(path)?;
            let pos = match db.get(POS_KEY)? {
                Some(v) if v.len() == 4 => read_u32(&v),
                _ => 0,
            };
            Ok(SledStore {
                db,
                batch: sled::Batch::default(),
                pos,
                hasher: H::new(),
            })
        }

        fn append(&mut self, bytes: &[u8]) -> (u16, u32) {
            let pos = self.pos;
            self.batch.insert(&addr_key(1, pos)[..], bytes);
            self.pos += bytes.len() as u32;
            (1, pos)
        }

        fn fetch(&self, index: u16, pos: u32, size: usize) -> Result<Vec<u8>> {
            let bytes = self
                .db
                .get(addr_key(index, pos))?
                .ok_or_else(|| Error::NotFound(format!("record at {}/{}", index, pos)))?;
            if bytes.len() != size {
                return Err(Error::Corruption(format!(
                    "record at {}/{} is {} bytes, wanted {}",
                    index,
                    pos,
                    bytes.len(),
                    size
                )));
            }
            Ok(bytes.to_vec())
        }
    }

    impl<H: Hasher> Store for SledStore<H> {
        fn get_root(&self) -> Result<Node> {
            match self.db.get(ROOT_KEY)? {
                None => Ok(Node::Null),
                Some(v) if v.len() == 7 => {
                    let index = read_u16(&v[0..]);
                    let pos = read_u32(&v[2..]);
                    load_root(self, &self.hasher, index, pos, v[6] == 1)
                }
                Some(v) => Err(Error::Corruption(format!(
                    "root pointer of {} bytes",
                    v.len()
                ))),
            }
        }

        fn get_node(&self, index: u16, pos: u32, is_leaf: bool) -> Result<Node> {
            let size = if is_leaf { LEAF_SIZE } else { INTERNAL_SIZE };
            decode_record(&self.fetch(index, pos, size)?, is_leaf)
        }

        fn get_value(&self, index: u16, pos: u32, size: u16) -> Result<Vec<u8>> {
            self.fetch(index, pos, size as usize)
        }

        fn write_node(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
            Ok(self.append(bytes))
        }

        fn write_value(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
            Ok(self.append(bytes))
        }

        fn commit(&mut self, root_index: u16, root_pos: u32, root_is_leaf: bool) -> Result<()> {
            let mut root = [0u8; 7];
            root[0..2].copy_from_slice(&root_index.to_le_bytes());
            root[2..6].copy_from_slice(&root_pos.to_le_bytes());
            root[6] = root_is_leaf as u8;
            self.batch.insert(ROOT_KEY, &root[..]);
            self.batch.insert(POS_KEY, &self.pos.to_le_bytes()[..]);
            let batch = std::mem::take(&mut self.batch);
            self.db.apply_batch(batch)?;
            self.db.flush()?;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_addressing() {
        let mut store: MemoryStore = MemoryStore::new();
        let (i1, p1) = store.write_value(b"hello").unwrap();
        let (i2, p2) = store.write_value(b"world").unwrap();
        assert_eq!((i1, p1), (1, 0));
        assert_eq!((i2, p2), (1, 5));

        // Staged bytes are invisible until commit.
        assert!(store.get_value(1, 0, 5).is_err());
        store.commit(0, 0, false).unwrap();
        assert_eq!(store.get_value(1, 0, 5).unwrap(), b"hello");
        assert_eq!(store.get_value(1, 5, 5).unwrap(), b"world");
    }

    #[test]
    fn test_memory_store_fresh_root_is_null() {
        let store: MemoryStore = MemoryStore::new();
        assert!(store.get_root().unwrap().is_null());
    }

    #[test]
    fn test_memory_store_empty_sentinel() {
        let mut store: MemoryStore = MemoryStore::new();
        store.commit(0, 0, false).unwrap();
        assert!(store.get_root().unwrap().is_null());
    }

    #[test]
    fn test_memory_store_out_of_bounds() {
        let store: MemoryStore = MemoryStore::new();
        assert!(matches!(
            store.get_value(1, 10, 4),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.get_value(2, 0, 4),
            Err(Error::NotFound(_))
        ));
    }
}
