//! Attribute types, scan operators and record identifiers.

use serde::{Deserialize, Serialize};

/// Key variant an index is parameterised by at creation.
///
/// The tag is stored in the index header page, so the discriminant values
/// are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    /// 32-bit signed integer keys.
    Integer = 0,
    /// 64-bit IEEE-754 double keys.
    Double = 1,
    /// Fixed-width byte-string keys of length 10.
    String = 2,
}

impl AttrType {
    /// Byte width of a key of this variant inside a node page.
    pub fn key_width(&self) -> usize {
        match self {
            AttrType::Integer => 4,
            AttrType::Double => 8,
            AttrType::String => 10,
        }
    }

    /// Decodes a tag byte read from the index header.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operators for scan bounds.
///
/// A scan's lower bound must use `GT` or `GTE`, its upper bound `LT` or
/// `LTE`. `EQ` exists for completeness of the operator set but is not used
/// by the range-scan paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    LT,
    LTE,
    GT,
    GTE,
    EQ,
}

impl Operator {
    /// Returns true if this operator is valid as a scan lower bound.
    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Operator::GT | Operator::GTE)
    }

    /// Returns true if this operator is valid as a scan upper bound.
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Operator::LT | Operator::LTE)
    }
}

/// Identifier of a record within a relation file.
///
/// Records are compared by identity only; the `Ord` derive (page number
/// first, then slot) exists for the duplicate-key tie-break in the index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecordId {
    /// Page number within the relation file.
    pub page_no: u32,
    /// Slot within that page.
    pub slot_no: u16,
}

impl RecordId {
    /// Size of a RecordId inside a node page: page_no (4) + slot_no (2) +
    /// 2 reserved bytes.
    pub const DISK_SIZE: usize = 8;

    /// Creates a new RecordId.
    pub fn new(page_no: u32, slot_no: u16) -> Self {
        Self { page_no, slot_no }
    }

    /// Serializes into `buf[..DISK_SIZE]`, little-endian.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_no.to_le_bytes());
        buf[6..8].fill(0);
    }

    /// Deserializes from `buf[..DISK_SIZE]`.
    pub fn decode_from(buf: &[u8]) -> Self {
        Self {
            page_no: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_no: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}
