//! Storage layer for TernDB.
//!
//! This crate provides:
//! - Blob files: page-granular file I/O with create/open/remove semantics
//! - The buffer manager: pinned page access over the buffer pool with
//!   RAII guards and write-back of evicted pages
//! - Fixed-record relation files and their scanner
//! - The B+ tree secondary index built on all of the above

mod blob;
mod btree;
mod bufmgr;
mod relation;

pub use blob::BlobFile;
pub use btree::{
    max_inner_capacity, max_leaf_capacity, BTreeIndex, FixedStr, IndexHeader, IndexKey, KeyValue,
};
pub use bufmgr::{BufferManager, PageGuard};
pub use relation::{RelationFile, RelationScan};
