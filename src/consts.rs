use crate::Hash;

/// Size of a digest, and therefore of a trie key, in bytes.
pub const HASH_LEN: usize = 32;

/// Number of levels in the trie: one per key bit.
pub const KEY_BITS: usize = HASH_LEN * 8;

/// Hash of an empty subtree.
pub const ZERO_HASH: Hash = [0x00; HASH_LEN];

/// Domain prefix mixed into leaf hashes.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain prefix mixed into internal hashes.
pub const INTERNAL_PREFIX: u8 = 0x01;

/// Encoded leaf record: tagged value index, value position, value size, key.
pub const LEAF_SIZE: usize = 2 + 4 + 2 + HASH_LEN;

/// Encoded internal record: two (tagged index, tagged position, hash) halves.
pub const INTERNAL_SIZE: usize = (2 + 4 + HASH_LEN) * 2;

/// "mrkl"; heads every meta record.
pub const META_MAGIC: u32 = 0x6d72_6b6c;

/// Encoded meta record size. Metas sit at multiples of this from file start.
pub const META_SIZE: usize = 36;

/// A log file stops growing once the next record would cross this boundary.
pub const MAX_FILE_SIZE: u64 = 2 * (1 << 30) - 4096;
