//! Disk-resident B+ tree secondary index.
//!
//! The index maps fixed-width attribute values to record identifiers and
//! answers range queries in ascending key order. All node pages move
//! through the buffer manager; an index file is laid out as:
//!
//! ```text
//! page 0   reserved (0 doubles as the null page sentinel)
//! page 1   header: relation name, attribute offset, key variant,
//!          root page number, node capacities
//! page 2+  one node per page, leaf or non-leaf
//! ```
//!
//! Leaves hold `(key, rid)` pairs in non-decreasing key order and chain to
//! their right siblings, so a range scan descends once on the lower bound
//! and then walks the chain. Inserts split full nodes bottom-up along the
//! descent path; when the root itself splits, a new root is installed and
//! the header's root pointer updated.
//!
//! Keys are one of three fixed-width variants (i32, f64, 10-byte string),
//! fixed per index at creation. The public [`BTreeIndex`] dispatches on the
//! variant once per call; everything below is generic.

mod index;
mod key;
mod node;
mod tree;

pub use index::BTreeIndex;
pub use key::{max_inner_capacity, max_leaf_capacity, FixedStr, IndexKey, KeyValue};
pub use node::IndexHeader;
