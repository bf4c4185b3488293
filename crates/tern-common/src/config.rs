//! Configuration structures for TernDB.

use serde::{Deserialize, Serialize};

/// Storage configuration for the buffer manager and paged files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Buffer pool size in number of page frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            buffer_pool_frames: 1024, // 16 MB with 16 KB pages
            fsync_enabled: true,
        }
    }
}

/// Per-index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Remove the index file when the index is dropped. The index is
    /// treated as ephemeral per session unless this is disabled.
    pub delete_on_teardown: bool,
    /// Leaf node capacity override. `None` derives the maximum that fits a
    /// page for the key variant. Persisted in the index header at creation.
    pub leaf_capacity: Option<usize>,
    /// Non-leaf node capacity override, same rules as `leaf_capacity`.
    pub inner_capacity: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            delete_on_teardown: true,
            leaf_capacity: None,
            inner_capacity: None,
        }
    }
}

impl IndexConfig {
    /// A config that keeps the index file across sessions.
    pub fn persistent() -> Self {
        Self {
            delete_on_teardown: false,
            ..Self::default()
        }
    }
}
