//! On-page layouts for index nodes and the index header.
//!
//! All layouts are little-endian and fixed for the life of a file.
//!
//! Header page (page 1):
//! ```text
//! [relation_name: 32][attr_byte_offset: u32][attr_type: u8][pad: 3]
//! [root_page_no: u32][leaf_capacity: u32][inner_capacity: u32]
//! ```
//!
//! Leaf node page:
//! ```text
//! [num_keys: u32][right_sib: u32][keys: K * cap][rids: 8 * cap]
//! ```
//!
//! Non-leaf node page:
//! ```text
//! [level: u32][num_keys: u32][keys: K * cap][children: u32 * (cap + 1)]
//! ```

use super::key::{IndexKey, NODE_HEADER_SIZE, PAGE_NO_SIZE};
use tern_common::page::PAGE_SIZE;
use tern_common::types::{AttrType, RecordId};
use tern_common::{Result, TernError};

/// Bytes reserved for the relation name in the header page.
const RELATION_NAME_SIZE: usize = 32;

/// A key of variant `K` with every byte zero.
fn zero_key<K: IndexKey>() -> K {
    K::decode_from(&[0u8; 16][..K::WIDTH])
}

/// Contents of the index header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Name of the indexed relation, at most 31 bytes.
    pub relation_name: String,
    /// Byte offset of the indexed attribute within a record.
    pub attr_byte_offset: u32,
    /// Key variant of the index.
    pub attr_type: AttrType,
    /// Current root page number.
    pub root_page_no: u32,
    /// Leaf node key capacity this file was created with.
    pub leaf_capacity: u32,
    /// Non-leaf node key capacity this file was created with.
    pub inner_capacity: u32,
}

impl IndexHeader {
    /// Serializes the header into a page buffer.
    pub fn write_to(&self, page: &mut [u8; PAGE_SIZE]) {
        page[..RELATION_NAME_SIZE].fill(0);
        let name = self.relation_name.as_bytes();
        let len = name.len().min(RELATION_NAME_SIZE - 1);
        page[..len].copy_from_slice(&name[..len]);

        page[32..36].copy_from_slice(&self.attr_byte_offset.to_le_bytes());
        page[36] = self.attr_type as u8;
        page[37..40].fill(0);
        page[40..44].copy_from_slice(&self.root_page_no.to_le_bytes());
        page[44..48].copy_from_slice(&self.leaf_capacity.to_le_bytes());
        page[48..52].copy_from_slice(&self.inner_capacity.to_le_bytes());
    }

    /// Rewrites only the root pointer field of a header page, used when a
    /// root split installs a new root.
    pub fn write_root_page_no(page: &mut [u8; PAGE_SIZE], root_page_no: u32) {
        page[40..44].copy_from_slice(&root_page_no.to_le_bytes());
    }

    /// Deserializes a header from a page buffer.
    pub fn read_from(page: &[u8; PAGE_SIZE]) -> Result<Self> {
        let name_end = page[..RELATION_NAME_SIZE]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RELATION_NAME_SIZE);
        let relation_name = String::from_utf8_lossy(&page[..name_end]).into_owned();

        let attr_type = AttrType::from_tag(page[36]).ok_or_else(|| {
            TernError::BadIndexInfo(format!("unknown attribute type tag {}", page[36]))
        })?;

        Ok(Self {
            relation_name,
            attr_byte_offset: u32::from_le_bytes([page[32], page[33], page[34], page[35]]),
            attr_type,
            root_page_no: u32::from_le_bytes([page[40], page[41], page[42], page[43]]),
            leaf_capacity: u32::from_le_bytes([page[44], page[45], page[46], page[47]]),
            inner_capacity: u32::from_le_bytes([page[48], page[49], page[50], page[51]]),
        })
    }
}

/// In-memory image of a leaf node.
///
/// `keys` and `rids` always hold `capacity` slots; only the first
/// `num_keys` are live.
#[derive(Debug, Clone)]
pub(crate) struct LeafNode<K> {
    pub num_keys: usize,
    pub right_sib: u32,
    pub keys: Vec<K>,
    pub rids: Vec<RecordId>,
}

impl<K: IndexKey> LeafNode<K> {
    /// An empty leaf with the given key capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            num_keys: 0,
            right_sib: 0,
            keys: vec![zero_key::<K>(); capacity],
            rids: vec![RecordId::new(0, 0); capacity],
        }
    }

    /// Key capacity of this node.
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// True once `num_keys` has reached capacity.
    pub fn is_full(&self) -> bool {
        self.num_keys >= self.capacity()
    }

    /// Decodes a leaf image from a page buffer.
    pub fn read_from(page: &[u8; PAGE_SIZE], capacity: usize) -> Self {
        let num_keys = u32::from_le_bytes([page[0], page[1], page[2], page[3]]) as usize;
        let right_sib = u32::from_le_bytes([page[4], page[5], page[6], page[7]]);

        let mut keys = Vec::with_capacity(capacity);
        let mut offset = NODE_HEADER_SIZE;
        for _ in 0..capacity {
            keys.push(K::decode_from(&page[offset..offset + K::WIDTH]));
            offset += K::WIDTH;
        }

        let mut rids = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            rids.push(RecordId::decode_from(&page[offset..offset + RecordId::DISK_SIZE]));
            offset += RecordId::DISK_SIZE;
        }

        Self {
            num_keys,
            right_sib,
            keys,
            rids,
        }
    }

    /// Encodes the leaf image into a page buffer.
    pub fn write_to(&self, page: &mut [u8; PAGE_SIZE]) {
        page[0..4].copy_from_slice(&(self.num_keys as u32).to_le_bytes());
        page[4..8].copy_from_slice(&self.right_sib.to_le_bytes());

        let mut offset = NODE_HEADER_SIZE;
        for key in &self.keys {
            key.encode_into(&mut page[offset..offset + K::WIDTH]);
            offset += K::WIDTH;
        }
        for rid in &self.rids {
            rid.encode_into(&mut page[offset..offset + RecordId::DISK_SIZE]);
            offset += RecordId::DISK_SIZE;
        }
    }
}

/// In-memory image of a non-leaf node.
///
/// `keys` holds `capacity` slots and `children` one more; only the first
/// `num_keys` keys and `num_keys + 1` children are live (`level == 0`
/// placeholder roots aside).
#[derive(Debug, Clone)]
pub(crate) struct NonLeafNode<K> {
    pub level: u32,
    pub num_keys: usize,
    pub keys: Vec<K>,
    pub children: Vec<u32>,
}

impl<K: IndexKey> NonLeafNode<K> {
    /// An empty non-leaf with the given key capacity.
    pub fn new(capacity: usize, level: u32) -> Self {
        Self {
            level,
            num_keys: 0,
            keys: vec![zero_key::<K>(); capacity],
            children: vec![0u32; capacity + 1],
        }
    }

    /// Key capacity of this node.
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// True once `num_keys` has reached capacity.
    pub fn is_full(&self) -> bool {
        self.num_keys >= self.capacity()
    }

    /// Index of the child to follow for `key`: the smallest `i` with
    /// `key < keys[i]`, or `num_keys` if none. Equal keys go right.
    pub fn child_index(&self, key: &K) -> usize {
        let mut i = 0;
        while i < self.num_keys {
            if key.key_cmp(&self.keys[i]).is_lt() {
                break;
            }
            i += 1;
        }
        i
    }

    /// Decodes a non-leaf image from a page buffer.
    pub fn read_from(page: &[u8; PAGE_SIZE], capacity: usize) -> Self {
        let level = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        let num_keys = u32::from_le_bytes([page[4], page[5], page[6], page[7]]) as usize;

        let mut keys = Vec::with_capacity(capacity);
        let mut offset = NODE_HEADER_SIZE;
        for _ in 0..capacity {
            keys.push(K::decode_from(&page[offset..offset + K::WIDTH]));
            offset += K::WIDTH;
        }

        let mut children = Vec::with_capacity(capacity + 1);
        for _ in 0..capacity + 1 {
            children.push(u32::from_le_bytes([
                page[offset],
                page[offset + 1],
                page[offset + 2],
                page[offset + 3],
            ]));
            offset += PAGE_NO_SIZE;
        }

        Self {
            level,
            num_keys,
            keys,
            children,
        }
    }

    /// Encodes the non-leaf image into a page buffer.
    pub fn write_to(&self, page: &mut [u8; PAGE_SIZE]) {
        page[0..4].copy_from_slice(&self.level.to_le_bytes());
        page[4..8].copy_from_slice(&(self.num_keys as u32).to_le_bytes());

        let mut offset = NODE_HEADER_SIZE;
        for key in &self.keys {
            key.encode_into(&mut page[offset..offset + K::WIDTH]);
            offset += K::WIDTH;
        }
        for child in &self.children {
            page[offset..offset + PAGE_NO_SIZE].copy_from_slice(&child.to_le_bytes());
            offset += PAGE_NO_SIZE;
        }
    }
}

/// A separator key plus the page to its right, handed up after a split.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageKeyPair<K> {
    pub page_no: u32,
    pub key: K,
}

/// Sorted insert of `(key, rid)` into a non-full leaf. The insertion point
/// is the first slot whose entry orders after `(key, rid)`, comparing keys
/// first and breaking ties on RID, so duplicates stay RID-ascending.
pub(crate) fn leaf_insert_sorted<K: IndexKey>(node: &mut LeafNode<K>, key: K, rid: RecordId) {
    debug_assert!(node.num_keys < node.capacity());

    let mut i = 0;
    while i < node.num_keys {
        match node.keys[i].key_cmp(&key) {
            std::cmp::Ordering::Greater => break,
            std::cmp::Ordering::Equal if node.rids[i] > rid => break,
            _ => i += 1,
        }
    }

    let n = node.num_keys;
    node.keys.copy_within(i..n, i + 1);
    node.rids.copy_within(i..n, i + 1);
    node.keys[i] = key;
    node.rids[i] = rid;
    node.num_keys += 1;
}

/// Sorted insert of a separator into a non-full non-leaf: the key lands at
/// the first slot with `keys[i] > key`, the child pointer at `i + 1`.
pub(crate) fn non_leaf_insert_sorted<K: IndexKey>(node: &mut NonLeafNode<K>, pair: PageKeyPair<K>) {
    debug_assert!(node.num_keys < node.capacity());

    let mut i = 0;
    while i < node.num_keys {
        if node.keys[i].key_cmp(&pair.key).is_gt() {
            break;
        }
        i += 1;
    }

    let n = node.num_keys;
    node.keys.copy_within(i..n, i + 1);
    node.children.copy_within(i + 1..n + 1, i + 2);
    node.keys[i] = pair.key;
    node.children[i + 1] = pair.page_no;
    node.num_keys += 1;
}

/// Swaps the pairs when `x` orders before `y`, leaving the maximum in `x`.
/// Used by the leaf overflow dance so the scratch slot ends up holding the
/// largest entry.
pub(crate) fn swap_rid_pair_if_less<K: IndexKey>(
    x: &mut (K, RecordId),
    y: &mut (K, RecordId),
) {
    let before = match x.0.key_cmp(&y.0) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Equal => x.1 < y.1,
        std::cmp::Ordering::Greater => false,
    };
    if before {
        std::mem::swap(x, y);
    }
}

/// Non-leaf counterpart of [`swap_rid_pair_if_less`]; separator keys need
/// no tie-break.
pub(crate) fn swap_page_pair_if_less<K: IndexKey>(
    x: &mut PageKeyPair<K>,
    y: &mut PageKeyPair<K>,
) {
    if x.key.key_cmp(&y.key).is_lt() {
        std::mem::swap(x, y);
    }
}
