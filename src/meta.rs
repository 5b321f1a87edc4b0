//! The commit metadata record.
//!
//! A meta is the last thing a commit writes: 36 self-checksummed bytes
//! pointing at the committed root's record. Recovery scans the log tail
//! backward for the newest window that decodes as one.

use crate::consts::{META_MAGIC, META_SIZE};
use crate::errors::{Error, Result};
use crate::hasher::Hasher;
use crate::node::{tag_pos, untag_pos};
use crate::utils::{read_u16, read_u32};

const CHECKSUM_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Meta {
    /// File index holding this meta.
    pub meta_index: u16,
    /// Offset of this meta within its file (after padding).
    pub meta_pos: u32,
    /// File index holding the committed root; 0 marks an empty tree.
    pub root_index: u16,
    pub root_pos: u32,
    pub root_is_leaf: bool,
}

impl Meta {
    pub fn encode<H: Hasher>(&self, hasher: &H) -> [u8; META_SIZE] {
        let mut b = [0u8; META_SIZE];
        b[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        b[4..6].copy_from_slice(&self.meta_index.to_le_bytes());
        b[6..10].copy_from_slice(&self.meta_pos.to_le_bytes());
        b[10..12].copy_from_slice(&self.root_index.to_le_bytes());
        b[12..16].copy_from_slice(&tag_pos(self.root_pos, self.root_is_leaf).to_le_bytes());
        let checksum = hasher.hash(&[&b[0..16]]);
        b[16..].copy_from_slice(&checksum[..CHECKSUM_LEN]);
        b
    }

    /// Decode and validate one candidate window. A magic collision over
    /// arbitrary record bytes fails the checksum here.
    pub fn decode<H: Hasher>(bytes: &[u8], hasher: &H) -> Result<Meta> {
        if bytes.len() != META_SIZE {
            return Err(Error::Corruption(format!(
                "meta record of {} bytes",
                bytes.len()
            )));
        }
        if read_u32(&bytes[0..]) != META_MAGIC {
            return Err(Error::Corruption("meta magic mismatch".into()));
        }
        let expected = hasher.hash(&[&bytes[0..16]]);
        if expected[..CHECKSUM_LEN] != bytes[16..] {
            return Err(Error::Corruption("meta checksum mismatch".into()));
        }
        let (root_is_leaf, root_pos) = untag_pos(read_u32(&bytes[12..]));
        Ok(Meta {
            meta_index: read_u16(&bytes[4..]),
            meta_pos: read_u32(&bytes[6..]),
            root_index: read_u16(&bytes[10..]),
            root_pos,
            root_is_leaf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha256;

    #[test]
    fn test_meta_roundtrip() {
        let hasher = Sha256::new();
        let meta = Meta {
            meta_index: 1,
            meta_pos: 100,
            root_index: 1,
            root_pos: 64,
            root_is_leaf: true,
        };
        let encoded = meta.encode(&hasher);
        let decoded = Meta::decode(&encoded, &hasher).unwrap();
        assert_eq!(decoded, meta);
        assert!(decoded.root_is_leaf);
        assert_eq!(decoded.root_pos, 64);
        assert_eq!(decoded.meta_pos, 100);
    }

    #[test]
    fn test_meta_rejects_bad_magic() {
        let hasher = Sha256::new();
        let meta = Meta {
            meta_index: 1,
            meta_pos: 36,
            root_index: 1,
            root_pos: 0,
            root_is_leaf: false,
        };
        let mut encoded = meta.encode(&hasher);
        encoded[0] ^= 0xff;
        assert!(Meta::decode(&encoded, &hasher).is_err());
    }

    #[test]
    fn test_meta_rejects_bad_checksum() {
        let hasher = Sha256::new();
        let meta = Meta {
            meta_index: 2,
            meta_pos: 72,
            root_index: 1,
            root_pos: 40,
            root_is_leaf: false,
        };
        let mut encoded = meta.encode(&hasher);
        // Tamper with the payload, leaving magic and checksum alone.
        encoded[10] ^= 0x01;
        assert!(Meta::decode(&encoded, &hasher).is_err());
    }

    #[test]
    fn test_meta_rejects_wrong_size() {
        let hasher = Sha256::new();
        assert!(Meta::decode(&[0u8; META_SIZE - 1], &hasher).is_err());
    }

    #[test]
    fn test_meta_checksum_differs_per_hasher() {
        let meta = Meta {
            meta_index: 1,
            meta_pos: 36,
            root_index: 1,
            root_pos: 0,
            root_is_leaf: false,
        };
        let sha = meta.encode(&Sha256::new());
        let blake = meta.encode(&crate::hasher::Blake3::new());
        assert_eq!(sha[..16], blake[..16]);
        assert_ne!(sha[16..], blake[16..]);
    }
}
