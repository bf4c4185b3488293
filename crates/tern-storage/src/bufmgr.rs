//! Buffer manager: the pool combined with the blob files behind it.

use crate::blob::BlobFile;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tern_buffer::{BufferPool, BufferPoolConfig, EvictedPage};
use tern_common::config::StorageConfig;
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// Serves pinned pages out of the buffer pool, falling back to the
/// registered blob files on a miss and writing evicted dirty pages back.
///
/// Every open blob file is registered once and addressed by the `file_id`
/// handed out at registration; a [`PageId`] then names any page the manager
/// can serve.
pub struct BufferManager {
    /// The in-memory frame pool.
    pool: BufferPool,
    /// Registered files by id.
    files: Mutex<HashMap<u32, Arc<BlobFile>>>,
    /// Next id to hand out. Starts at 1; 0 is never a valid file id.
    next_file_id: AtomicU32,
    /// Whether blob files opened for this manager should fsync writes.
    fsync_enabled: bool,
}

impl BufferManager {
    /// Creates a buffer manager with the configured pool size.
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            pool: BufferPool::new(BufferPoolConfig {
                num_frames: config.buffer_pool_frames,
            }),
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            fsync_enabled: config.fsync_enabled,
        }
    }

    /// Creates a buffer manager whose pool is sized from available RAM.
    pub fn auto_sized() -> Self {
        Self {
            pool: BufferPool::auto_sized(),
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            fsync_enabled: StorageConfig::default().fsync_enabled,
        }
    }

    /// Whether files managed here should fsync their writes.
    pub fn fsync_enabled(&self) -> bool {
        self.fsync_enabled
    }

    /// Registers an open blob file and returns its file id.
    pub fn register_file(&self, file: BlobFile) -> u32 {
        let file_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
        self.files.lock().insert(file_id, Arc::new(file));
        file_id
    }

    /// Looks up a registered file.
    pub fn file(&self, file_id: u32) -> Result<Arc<BlobFile>> {
        self.files
            .lock()
            .get(&file_id)
            .cloned()
            .ok_or(TernError::UnknownFileId(file_id))
    }

    /// Writes an evicted dirty page back to its file.
    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(ev) = evicted {
            let file = self.file(ev.page_id.file_id)?;
            file.write_page(ev.page_id.page_num, &ev.data)?;
        }
        Ok(())
    }

    /// Reads a page, pinning it. Loads from the blob file on a pool miss.
    pub fn read_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard> {
        if self.pool.fetch(page_id).is_some() {
            return Ok(PageGuard::new(self, page_id));
        }

        let file = self.file(page_id.file_id)?;
        let data = file.read_page(page_id.page_num)?;
        let (_, evicted) = self.pool.load_page(page_id, &data)?;

        if let Err(e) = self.write_back(evicted) {
            self.pool.unpin(page_id, false);
            return Err(e);
        }
        Ok(PageGuard::new(self, page_id))
    }

    /// Allocates a fresh zero-initialised page at the end of the file,
    /// pinning it. The page is dirty-tracked from its first mutation.
    pub fn alloc_page(self: &Arc<Self>, file_id: u32) -> Result<PageGuard> {
        let file = self.file(file_id)?;
        let page_no = file.allocate_page()?;
        let page_id = PageId::new(file_id, page_no);

        let (_, evicted) = self.pool.put_page(page_id)?;
        if let Err(e) = self.write_back(evicted) {
            self.pool.unpin(page_id, false);
            return Err(e);
        }
        Ok(PageGuard::new(self, page_id))
    }

    /// Writes every dirty cached page of the file to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let file = self.file(file_id)?;
        self.pool
            .flush_file(file_id, |pid, data| file.write_page(pid.page_num, data))?;
        file.sync()?;
        Ok(())
    }

    /// Flushes the file, drops its cached pages, and unregisters it.
    /// Returns the file handle for the caller to close or remove.
    pub fn dispose_file(&self, file_id: u32) -> Result<Arc<BlobFile>> {
        self.flush_file(file_id)?;
        self.pool.drop_file(file_id);
        self.files
            .lock()
            .remove(&file_id)
            .ok_or(TernError::UnknownFileId(file_id))
    }

    /// Number of pages currently cached (all files).
    pub fn cached_pages(&self) -> usize {
        self.pool.page_count()
    }

    fn unpin(&self, page_id: PageId, dirty: bool) {
        self.pool.unpin(page_id, dirty);
    }
}

/// Scoped pin on one page.
///
/// Holding a guard keeps the page resident; dropping it releases the pin.
/// Mutation through [`PageGuard::with_data_mut`] marks the page dirty so
/// the pool writes it back on flush or eviction.
pub struct PageGuard {
    mgr: Arc<BufferManager>,
    page_id: PageId,
}

impl PageGuard {
    fn new(mgr: &Arc<BufferManager>, page_id: PageId) -> Self {
        Self {
            mgr: Arc::clone(mgr),
            page_id,
        }
    }

    /// Returns the pinned page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the pinned page's number within its file.
    pub fn page_no(&self) -> u32 {
        self.page_id.page_num
    }

    /// Runs `f` over the page contents.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        // The pin guarantees residency, so the lookup cannot miss.
        self.mgr
            .pool
            .with_page(self.page_id, f)
            .unwrap_or_else(|| unreachable!("pinned page {} not resident", self.page_id))
    }

    /// Runs `f` over the page contents mutably and marks the page dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        self.mgr
            .pool
            .with_page_mut(self.page_id, f)
            .unwrap_or_else(|| unreachable!("pinned page {} not resident", self.page_id))
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.mgr.unpin(self.page_id, false);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}
