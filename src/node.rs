//! The node model and its on-disk record codec.
//!
//! Every slot in the tree is exactly one of four variants: `Null` for an
//! empty subtree, `Leaf` and `Internal` for concrete nodes, and `Hash` as a
//! lazy placeholder for a persisted node whose body lives in the store.
//! Children are reference-counted immutable values, so rebuilding a path
//! shares every untouched subtree with the previous root.

use std::rc::Rc;

use crate::consts::{INTERNAL_PREFIX, INTERNAL_SIZE, LEAF_SIZE, ZERO_HASH};
use crate::errors::{Error, Result};
use crate::hasher::Hasher;
use crate::utils::{read_u16, read_u32, slice_to_hash};
use crate::Hash;

/// Store address of a persisted node record: file index plus byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeAddr {
    pub index: u16,
    pub pos: u32,
}

/// Placeholder for a persisted node: its subtree hash plus where to find the
/// record. Resolving one yields the concrete `Leaf` or `Internal` it stands
/// in for, carrying the same hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashNode {
    pub hash: Hash,
    pub addr: NodeAddr,
    pub leaf: bool,
}

/// Leaf of the tree. Holds the trie key and, for freshly inserted leaves, the
/// value itself; once persisted only the value's store address is kept and
/// the bytes are fetched on demand.
#[derive(Clone, Debug)]
pub struct LeafNode {
    /// `H(0x00 ‖ key ‖ H(value))`, cached at construction or resolve time.
    pub hash: Hash,
    pub key: Hash,
    pub value: Option<Vec<u8>>,
    pub vindex: u16,
    pub vpos: u32,
    pub vsize: u16,
    /// Record address once persisted; `None` marks a dirty leaf that the next
    /// commit must write out.
    pub addr: Option<NodeAddr>,
}

/// Branch. Children are `Null`, placeholders, or further in-memory nodes.
#[derive(Clone, Debug)]
pub struct InternalNode {
    pub left: Rc<Node>,
    pub right: Rc<Node>,
}

#[derive(Clone, Debug)]
pub enum Node {
    Null,
    Hash(HashNode),
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn new_leaf(key: Hash, value: Vec<u8>, hash: Hash) -> Self {
        Node::Leaf(LeafNode {
            hash,
            key,
            value: Some(value),
            vindex: 0,
            vpos: 0,
            vsize: 0,
            addr: None,
        })
    }

    pub fn new_internal(left: Rc<Node>, right: Rc<Node>) -> Self {
        Node::Internal(InternalNode { left, right })
    }

    /// Subtree hash. O(1) everywhere except in-memory internals, which fold
    /// `H(0x01 ‖ left ‖ right)` over their children.
    pub fn hash<H: Hasher>(&self, hasher: &H) -> Hash {
        match self {
            Node::Null => hasher.zero_hash(),
            Node::Hash(n) => n.hash,
            Node::Leaf(n) => n.hash,
            Node::Internal(n) => {
                let left = n.left.hash(hasher);
                let right = n.right.hash(hasher);
                hasher.hash(&[&[INTERNAL_PREFIX], &left[..], &right[..]])
            }
        }
    }

    /// True for leaves and for placeholders standing in for one.
    pub fn is_leaf(&self) -> bool {
        match self {
            Node::Leaf(_) => true,
            Node::Hash(n) => n.leaf,
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }
}

/// Tag a record position with the node-kind bit.
pub fn tag_pos(pos: u32, is_leaf: bool) -> u32 {
    (pos << 1) | is_leaf as u32
}

/// Recover (is_leaf, position) from a tagged position.
pub fn untag_pos(tagged: u32) -> (bool, u32) {
    (tagged & 1 == 1, tagged >> 1)
}

impl LeafNode {
    /// Encode to the fixed 40-byte record. The value index is doubled with a
    /// set low bit so the decoder can tell a leaf record from an internal one.
    pub fn encode(&self) -> [u8; LEAF_SIZE] {
        let mut b = [0u8; LEAF_SIZE];
        b[0..2].copy_from_slice(&((self.vindex << 1) | 1).to_le_bytes());
        b[2..6].copy_from_slice(&self.vpos.to_le_bytes());
        b[6..8].copy_from_slice(&self.vsize.to_le_bytes());
        b[8..].copy_from_slice(&self.key);
        b
    }
}

/// Decode a 40-byte leaf record. The record does not carry the subtree hash;
/// the caller that knows it (the placeholder being resolved, or the root
/// loader) fills it in.
pub fn decode_leaf(bytes: &[u8]) -> Result<LeafNode> {
    if bytes.len() != LEAF_SIZE {
        return Err(Error::Corruption(format!(
            "leaf record of {} bytes",
            bytes.len()
        )));
    }
    let tagged = read_u16(&bytes[0..]);
    if tagged & 1 != 1 {
        return Err(Error::Corruption("leaf record with internal tag".into()));
    }
    Ok(LeafNode {
        hash: ZERO_HASH,
        key: slice_to_hash(&bytes[8..]),
        value: None,
        vindex: tagged >> 1,
        vpos: read_u32(&bytes[2..]),
        vsize: read_u16(&bytes[6..]),
        addr: None,
    })
}

impl InternalNode {
    /// Encode to the fixed 76-byte record. Children must already be persisted
    /// (placeholders) or `Null`; the commit pass guarantees this by writing
    /// children before their parent.
    pub fn encode(&self) -> [u8; INTERNAL_SIZE] {
        let (lindex, lpos, lleaf, lhash) = child_fields(&self.left);
        let (rindex, rpos, rleaf, rhash) = child_fields(&self.right);
        let mut b = [0u8; INTERNAL_SIZE];
        // The doubled left index doubles as the record-kind sentinel.
        b[0..2].copy_from_slice(&(lindex << 1).to_le_bytes());
        b[2..6].copy_from_slice(&tag_pos(lpos, lleaf).to_le_bytes());
        b[6..38].copy_from_slice(&lhash);
        b[38..40].copy_from_slice(&rindex.to_le_bytes());
        b[40..44].copy_from_slice(&tag_pos(rpos, rleaf).to_le_bytes());
        b[44..76].copy_from_slice(&rhash);
        b
    }
}

fn child_fields(child: &Node) -> (u16, u32, bool, Hash) {
    match child {
        Node::Null => (0, 0, false, ZERO_HASH),
        Node::Hash(n) => (n.addr.index, n.addr.pos, n.leaf, n.hash),
        Node::Leaf(_) | Node::Internal(_) => unreachable!("encoding an internal with a dirty child"),
    }
}

/// Decode a 76-byte internal record. Children come back as placeholders;
/// a zero child hash marks an empty subtree.
pub fn decode_internal(bytes: &[u8]) -> Result<InternalNode> {
    if bytes.len() != INTERNAL_SIZE {
        return Err(Error::Corruption(format!(
            "internal record of {} bytes",
            bytes.len()
        )));
    }
    let tagged = read_u16(&bytes[0..]);
    if tagged & 1 != 0 {
        return Err(Error::Corruption("internal record with leaf tag".into()));
    }
    let (lleaf, lpos) = untag_pos(read_u32(&bytes[2..]));
    let (rleaf, rpos) = untag_pos(read_u32(&bytes[40..]));
    Ok(InternalNode {
        left: Rc::new(child_node(
            tagged >> 1,
            lpos,
            slice_to_hash(&bytes[6..38]),
            lleaf,
        )),
        right: Rc::new(child_node(
            read_u16(&bytes[38..]),
            rpos,
            slice_to_hash(&bytes[44..76]),
            rleaf,
        )),
    })
}

fn child_node(index: u16, pos: u32, hash: Hash, leaf: bool) -> Node {
    if hash == ZERO_HASH {
        Node::Null
    } else {
        Node::Hash(HashNode {
            hash,
            addr: NodeAddr { index, pos },
            leaf,
        })
    }
}
