//! Key variants and node capacity arithmetic.
//!
//! The public API passes keys as a [`KeyValue`] tagged union; below the
//! single dispatch switch everything is generic over [`IndexKey`], so the
//! runtime tag is consulted exactly once per operation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tern_common::page::PAGE_SIZE;
use tern_common::types::{AttrType, RecordId};
use tern_common::{Result, TernError};

/// Bytes of node header shared by both node shapes: two u32 fields
/// (level / num_keys for non-leaves, num_keys / right sibling for leaves).
pub(crate) const NODE_HEADER_SIZE: usize = 8;

/// Bytes of a child page number inside a non-leaf node.
pub(crate) const PAGE_NO_SIZE: usize = 4;

/// A fixed-width key stored in an index node.
///
/// Implementations are plain-old-data: `WIDTH` bytes on the page, a total
/// order, and a little-endian codec.
pub trait IndexKey: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Bytes one key occupies inside a node page.
    const WIDTH: usize;

    /// Serializes into `buf[..WIDTH]`.
    fn encode_into(&self, buf: &mut [u8]);

    /// Deserializes from `buf[..WIDTH]`.
    fn decode_from(buf: &[u8]) -> Self;

    /// Total order over keys of this variant.
    fn key_cmp(&self, other: &Self) -> Ordering;
}

impl IndexKey for i32 {
    const WIDTH: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl IndexKey for f64 {
    const WIDTH: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        f64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        // total_cmp so every stored bit pattern sorts deterministically.
        self.total_cmp(other)
    }
}

/// Fixed-width byte-string key of length 10, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedStr(pub [u8; 10]);

impl FixedStr {
    /// Builds a key from a string, truncating or zero-padding to 10 bytes.
    pub fn from_str_padded(s: &str) -> Self {
        let mut bytes = [0u8; 10];
        let src = s.as_bytes();
        let len = src.len().min(10);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }
}

impl From<&str> for FixedStr {
    fn from(s: &str) -> Self {
        Self::from_str_padded(s)
    }
}

impl std::fmt::Display for FixedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(10);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl IndexKey for FixedStr {
    const WIDTH: usize = 10;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..10].copy_from_slice(&self.0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 10];
        bytes.copy_from_slice(&buf[..10]);
        Self(bytes)
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// A key value of any variant, as passed through the public index API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i32),
    Double(f64),
    Str(FixedStr),
}

impl KeyValue {
    /// The variant this value belongs to.
    pub fn attr_type(&self) -> AttrType {
        match self {
            KeyValue::Int(_) => AttrType::Integer,
            KeyValue::Double(_) => AttrType::Double,
            KeyValue::Str(_) => AttrType::String,
        }
    }

    /// Extracts a key of the given variant from raw record bytes at
    /// `offset`, as the index build does for every scanned record.
    pub fn from_record(attr_type: AttrType, record: &[u8], offset: usize) -> Result<Self> {
        let width = attr_type.key_width();
        let field = record.get(offset..offset + width).ok_or_else(|| {
            TernError::InvalidRecord(format!(
                "record of {} bytes has no {} field at offset {}",
                record.len(),
                attr_type,
                offset
            ))
        })?;

        Ok(match attr_type {
            AttrType::Integer => KeyValue::Int(i32::decode_from(field)),
            AttrType::Double => KeyValue::Double(f64::decode_from(field)),
            AttrType::String => KeyValue::Str(FixedStr::decode_from(field)),
        })
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(v)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        KeyValue::Double(v)
    }
}

impl From<FixedStr> for KeyValue {
    fn from(v: FixedStr) -> Self {
        KeyValue::Str(v)
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Str(FixedStr::from_str_padded(s))
    }
}

/// Largest leaf key count satisfying
/// `cap * (key + rid) + header <= PAGE_SIZE` for the given key width.
pub fn max_leaf_capacity(key_width: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (key_width + RecordId::DISK_SIZE)
}

/// Largest non-leaf key count satisfying
/// `cap * (key + page_no) + page_no + header <= PAGE_SIZE` (one more child
/// than keys) for the given key width.
pub fn max_inner_capacity(key_width: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE - PAGE_NO_SIZE) / (key_width + PAGE_NO_SIZE)
}
