//! Buffer pool management for TernDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with a configurable frame count
//! - Pin counting so in-use pages are never evicted
//! - Clock (second-chance) eviction policy
//! - Dirty tracking with callback-based write-back

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, EvictedPage};
pub use replacer::ClockReplacer;
