//! The trie engine and its public faces: `Tree`, `Transaction`, `Snapshot`.
//!
//! The tree is a perfect binary trie of depth 256 navigated by the bits of
//! the hashed key. Insert and remove walk down stacking the sibling of every
//! level they pass, then rebuild the touched path bottom-up; everything off
//! the path is shared with the previous root by reference. Commit persists
//! dirty subtrees post-order and swaps the committed root at the very end.

use std::rc::Rc;

use log::debug;

use crate::consts::{INTERNAL_PREFIX, KEY_BITS};
use crate::errors::{Error, Result};
use crate::hasher::{leaf_hash, Hasher, Sha256};
use crate::node::{HashNode, InternalNode, LeafNode, Node, NodeAddr};
use crate::proof::{Proof, ProofType};
use crate::store::{MemoryStore, Store};
use crate::utils::bit;
use crate::Hash;

/// Authenticated key-value store over a sparse binary Merkle trie.
///
/// Reads go through [`Snapshot`]s and writes through [`Transaction`]s; the
/// borrow checker enforces the single-writer, many-reader discipline. Wrap
/// the tree in a mutex if threads must share it.
pub struct Tree<S = MemoryStore, H = Sha256> {
    store: S,
    hasher: H,
    root: Rc<Node>,
}

impl<S: Store, H: Hasher> Tree<S, H> {
    /// Open a tree over `store`, recovering the last committed root.
    pub fn open(store: S) -> Result<Self> {
        let root = store.get_root()?;
        Ok(Tree {
            store,
            hasher: H::new(),
            root: Rc::new(root),
        })
    }

    /// Hash of the last committed root; the zero hash for an empty tree.
    pub fn root_hash(&self) -> Hash {
        self.root.hash(&self.hasher)
    }

    /// Start a writer view seeded with the committed root. The mutable
    /// borrow keeps the tree single-writer until the transaction is dropped.
    pub fn transaction(&mut self) -> Transaction<'_, S, H> {
        let root = self.root.clone();
        Transaction { tree: self, root }
    }

    /// Immutable read view pinned to the current committed root.
    pub fn snapshot(&self) -> Snapshot<'_, S, H> {
        Snapshot {
            tree: self,
            root: self.root.clone(),
        }
    }

    /// Flush and release the underlying store.
    pub fn close(mut self) -> Result<()> {
        self.store.close()
    }

    /// Swap a placeholder for the concrete node it stands in for, carrying
    /// the hash and address over so the node is not re-persisted later.
    fn resolve(&self, placeholder: &HashNode) -> Result<Node> {
        let mut node =
            self.store
                .get_node(placeholder.addr.index, placeholder.addr.pos, placeholder.leaf)?;
        if let Node::Leaf(leaf) = &mut node {
            leaf.hash = placeholder.hash;
            leaf.addr = Some(placeholder.addr);
        }
        Ok(node)
    }

    fn insert(&self, root: &Rc<Node>, key: &Hash, value: Vec<u8>) -> Result<Rc<Node>> {
        let new_hash = leaf_hash(&self.hasher, key, &value);
        let mut siblings: Vec<Rc<Node>> = Vec::new();
        let mut depth = 0usize;
        let mut cursor = root.clone();

        loop {
            let next = match &*cursor {
                Node::Null => None,
                Node::Hash(n) => Some(Rc::new(self.resolve(n)?)),
                Node::Internal(n) => {
                    if depth == KEY_BITS {
                        return Err(Error::Corruption(format!("branch at depth {}", depth)));
                    }
                    let (sibling, next) = if bit(key, depth) {
                        (n.left.clone(), n.right.clone())
                    } else {
                        (n.right.clone(), n.left.clone())
                    };
                    siblings.push(sibling);
                    depth += 1;
                    Some(next)
                }
                Node::Leaf(leaf) => {
                    if leaf.key == *key {
                        if leaf.hash == new_hash {
                            // Same key, same value: the tree is untouched.
                            return Ok(root.clone());
                        }
                        // Same key, new value: the fresh leaf takes this slot.
                        None
                    } else {
                        // The two keys share a prefix from here; each shared
                        // bit gets an empty sibling, then the old leaf
                        // becomes the sibling at the first differing bit.
                        while bit(key, depth) == bit(&leaf.key, depth) {
                            siblings.push(Rc::new(Node::Null));
                            depth += 1;
                        }
                        siblings.push(cursor.clone());
                        depth += 1;
                        None
                    }
                }
            };
            match next {
                Some(node) => cursor = node,
                None => break,
            }
        }

        let mut next = Rc::new(Node::new_leaf(*key, value, new_hash));
        for sibling in siblings.into_iter().rev() {
            depth -= 1;
            next = Rc::new(if bit(key, depth) {
                Node::new_internal(sibling, next)
            } else {
                Node::new_internal(next, sibling)
            });
        }
        Ok(next)
    }

    fn remove(&self, root: &Rc<Node>, key: &Hash) -> Result<Rc<Node>> {
        let mut siblings: Vec<Rc<Node>> = Vec::new();
        let mut depth = 0usize;
        let mut cursor = root.clone();

        loop {
            let next = match &*cursor {
                // The key was never here; the tree is untouched.
                Node::Null => return Ok(root.clone()),
                Node::Hash(n) => Some(Rc::new(self.resolve(n)?)),
                Node::Internal(n) => {
                    if depth == KEY_BITS {
                        return Err(Error::Corruption(format!("branch at depth {}", depth)));
                    }
                    let (sibling, next) = if bit(key, depth) {
                        (n.left.clone(), n.right.clone())
                    } else {
                        (n.right.clone(), n.left.clone())
                    };
                    siblings.push(sibling);
                    depth += 1;
                    Some(next)
                }
                Node::Leaf(leaf) => {
                    if leaf.key != *key {
                        return Ok(root.clone());
                    }
                    None
                }
            };
            match next {
                Some(node) => cursor = node,
                None => break,
            }
        }

        let mut next = match siblings.pop() {
            // The leaf was the whole tree.
            None => return Ok(Rc::new(Node::Null)),
            Some(sibling) => {
                if sibling.is_leaf() {
                    // The surviving leaf rises past every empty level above
                    // it to its correct branching depth.
                    depth -= 1;
                    while let Some(above) = siblings.last() {
                        if depth == 0 || !above.is_null() {
                            break;
                        }
                        siblings.pop();
                        depth -= 1;
                    }
                    sibling
                } else {
                    // A branch survives next to the removed leaf; the slot
                    // just becomes empty.
                    siblings.push(sibling);
                    Rc::new(Node::Null)
                }
            }
        };

        for sibling in siblings.into_iter().rev() {
            depth -= 1;
            next = Rc::new(if bit(key, depth) {
                Node::new_internal(sibling, next)
            } else {
                Node::new_internal(next, sibling)
            });
        }
        Ok(next)
    }

    fn get(&self, root: &Rc<Node>, key: &Hash) -> Result<Option<Vec<u8>>> {
        let mut depth = 0usize;
        let mut cursor = root.clone();
        loop {
            let next = match &*cursor {
                Node::Null => return Ok(None),
                Node::Hash(n) => Rc::new(self.resolve(n)?),
                Node::Internal(n) => {
                    if depth == KEY_BITS {
                        return Err(Error::Corruption(format!("branch at depth {}", depth)));
                    }
                    let next = if bit(key, depth) {
                        n.right.clone()
                    } else {
                        n.left.clone()
                    };
                    depth += 1;
                    next
                }
                Node::Leaf(leaf) => {
                    if leaf.key != *key {
                        // Prefix collision: some other key lives down this path.
                        return Ok(None);
                    }
                    return self.leaf_value(leaf).map(Some);
                }
            };
            cursor = next;
        }
    }

    fn leaf_value(&self, leaf: &LeafNode) -> Result<Vec<u8>> {
        match &leaf.value {
            Some(value) => Ok(value.clone()),
            None => self.store.get_value(leaf.vindex, leaf.vpos, leaf.vsize),
        }
    }

    fn prove(&self, root: &Rc<Node>, key: &Hash) -> Result<Proof> {
        let mut proof = Proof::new();
        let mut depth = 0usize;
        let mut cursor = root.clone();

        loop {
            let next = match &*cursor {
                Node::Null => break,
                Node::Hash(n) => Some(Rc::new(self.resolve(n)?)),
                Node::Internal(n) => {
                    if depth == KEY_BITS {
                        return Err(Error::Corruption(format!("branch at depth {}", depth)));
                    }
                    let (sibling, next) = if bit(key, depth) {
                        (&n.left, &n.right)
                    } else {
                        (&n.right, &n.left)
                    };
                    proof.push(sibling.hash(&self.hasher));
                    depth += 1;
                    Some(next.clone())
                }
                Node::Leaf(leaf) => {
                    let value = self.leaf_value(leaf)?;
                    if leaf.key == *key {
                        proof.proof_type = ProofType::Exists;
                        proof.value = Some(value);
                    } else {
                        proof.proof_type = ProofType::Collision;
                        proof.key = Some(leaf.key);
                        proof.hash = Some(self.hasher.hash(&[&value[..]]));
                    }
                    None
                }
            };
            match next {
                Some(node) => cursor = node,
                None => break,
            }
        }
        Ok(proof)
    }

    /// Post-order write pass: every dirty leaf and internal is persisted and
    /// replaced by a placeholder carrying its hash and fresh address. Values
    /// go out before their leaf record, children before their parent.
    fn write_node(&mut self, node: &Rc<Node>) -> Result<Rc<Node>> {
        match &**node {
            Node::Null | Node::Hash(_) => Ok(node.clone()),
            Node::Internal(n) => {
                let left = self.write_node(&n.left)?;
                let right = self.write_node(&n.right)?;
                let hash = {
                    let lh = left.hash(&self.hasher);
                    let rh = right.hash(&self.hasher);
                    self.hasher.hash(&[&[INTERNAL_PREFIX], &lh[..], &rh[..]])
                };
                let stored = InternalNode { left, right };
                let (index, pos) = self.store.write_node(&stored.encode())?;
                Ok(Rc::new(Node::Hash(HashNode {
                    hash,
                    addr: NodeAddr { index, pos },
                    leaf: false,
                })))
            }
            Node::Leaf(leaf) => {
                if let Some(addr) = leaf.addr {
                    // Already persisted by an earlier commit; shared as-is.
                    return Ok(Rc::new(Node::Hash(HashNode {
                        hash: leaf.hash,
                        addr,
                        leaf: true,
                    })));
                }
                let value = match &leaf.value {
                    Some(value) => value,
                    None => return Err(Error::Corruption("dirty leaf without value".into())),
                };
                let (vindex, vpos) = self.store.write_value(value)?;
                let mut stored = leaf.clone();
                stored.vindex = vindex;
                stored.vpos = vpos;
                stored.vsize = value.len() as u16;
                let (index, pos) = self.store.write_node(&stored.encode())?;
                Ok(Rc::new(Node::Hash(HashNode {
                    hash: leaf.hash,
                    addr: NodeAddr { index, pos },
                    leaf: true,
                })))
            }
        }
    }

    fn commit_root(&mut self, root: &Rc<Node>) -> Result<Rc<Node>> {
        let new_root = self.write_node(root)?;
        let (index, pos, leaf) = match &*new_root {
            Node::Null => (0, 0, false),
            Node::Hash(n) => (n.addr.index, n.addr.pos, n.leaf),
            _ => unreachable!("write pass leaves only placeholders"),
        };
        self.store.commit(index, pos, leaf)?;
        self.root = new_root.clone();
        debug!("committed root {}", hex::encode(self.root_hash()));
        Ok(new_root)
    }
}

/// Writer view: mutates a private working root, then `commit` persists it
/// and installs it on the tree. The committed root is untouched until then.
pub struct Transaction<'a, S, H> {
    tree: &'a mut Tree<S, H>,
    root: Rc<Node>,
}

impl<S: Store, H: Hasher> Transaction<'_, S, H> {
    /// Map `key` to `value` in the working tree.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(Error::ValueTooLarge(value.len()));
        }
        let key = self.tree.hasher.hash(&[key]);
        self.root = self.tree.insert(&self.root, &key, value.to_vec())?;
        Ok(())
    }

    /// Drop `key` from the working tree; absent keys are a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let key = self.tree.hasher.hash(&[key]);
        self.root = self.tree.remove(&self.root, &key)?;
        Ok(())
    }

    /// Hash of the uncommitted working root.
    pub fn root_hash(&self) -> Hash {
        self.root.hash(&self.tree.hasher)
    }

    /// Persist the working tree and swap it in as the committed root,
    /// returning the new root hash. On error nothing becomes visible and the
    /// working root stays valid, so the commit can be retried.
    pub fn commit(&mut self) -> Result<Hash> {
        let new_root = self.tree.commit_root(&self.root)?;
        self.root = new_root;
        Ok(self.root.hash(&self.tree.hasher))
    }
}

/// Read-only view pinned to the committed root it was taken from.
pub struct Snapshot<'a, S, H> {
    tree: &'a Tree<S, H>,
    root: Rc<Node>,
}

impl<S: Store, H: Hasher> Snapshot<'_, S, H> {
    /// Value for `key`, or `None` if absent under this root.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.tree.hasher.hash(&[key]);
        self.tree.get(&self.root, &key)
    }

    pub fn root_hash(&self) -> Hash {
        self.root.hash(&self.tree.hasher)
    }

    /// Membership, collision or absence proof for `key` under this root.
    pub fn proof(&self, key: &[u8]) -> Result<Proof> {
        let key = self.tree.hasher.hash(&[key]);
        self.tree.prove(&self.root, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::ProofCode;

    fn open_memory() -> Tree {
        Tree::open(MemoryStore::new()).unwrap()
    }

    #[test]
    fn test_set_get_before_commit_is_invisible() {
        let mut tree = open_memory();
        let empty = tree.root_hash();
        {
            let mut tx = tree.transaction();
            tx.set(b"name-1", b"value-1").unwrap();
            assert_ne!(tx.root_hash(), empty);
        }
        // Dropped without commit: nothing changed.
        assert_eq!(tree.root_hash(), empty);
        assert_eq!(tree.snapshot().get(b"name-1").unwrap(), None);
    }

    #[test]
    fn test_insert_same_pair_is_stable() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        let first = tx.root_hash();
        tx.set(b"name-1", b"value-1").unwrap();
        assert_eq!(tx.root_hash(), first);
    }

    #[test]
    fn test_update_replaces_value() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        tx.set(b"name-1", b"value-2").unwrap();
        tx.commit().unwrap();
        assert_eq!(
            tree.snapshot().get(b"name-1").unwrap(),
            Some(b"value-2".to_vec())
        );
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        let before = tx.root_hash();
        tx.remove(b"never-inserted").unwrap();
        assert_eq!(tx.root_hash(), before);
    }

    #[test]
    fn test_remove_last_key_empties_tree() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        tx.remove(b"name-1").unwrap();
        let root = tx.commit().unwrap();
        assert_eq!(root, Sha256::new().zero_hash());
    }

    #[test]
    fn test_remove_collapses_to_sibling_leaf() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        let lone = tx.root_hash();
        tx.set(b"name-2", b"value-2").unwrap();
        tx.remove(b"name-2").unwrap();
        // The surviving leaf rose back to the root.
        assert_eq!(tx.root_hash(), lone);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        let huge = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            tx.set(b"k", &huge),
            Err(Error::ValueTooLarge(_))
        ));
    }

    #[test]
    fn test_commit_then_prove_roundtrip() {
        let mut tree = open_memory();
        let mut tx = tree.transaction();
        tx.set(b"name-1", b"value-1").unwrap();
        tx.set(b"name-2", b"value-2").unwrap();
        let root = tx.commit().unwrap();

        let snapshot = tree.snapshot();
        let proof = snapshot.proof(b"name-2").unwrap();
        assert_eq!(proof.proof_type, ProofType::Exists);
        let key = Sha256::new().hash(&[b"name-2"]);
        let result = proof.verify(&root, &key, &Sha256::new(), KEY_BITS);
        assert_eq!(result.code, ProofCode::Ok);
        assert_eq!(result.value, Some(b"value-2".to_vec()));
    }
}
