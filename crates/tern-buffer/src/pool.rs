//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::ClockReplacer;
use parking_lot::Mutex;
use std::collections::HashMap;
use sysinfo::System;
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// A dirty page that was evicted to make room. The caller must write it to
/// its backing file before the eviction is durable.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Fixed-size pool of page frames.
///
/// Pages are cached in frames and addressed through a page table. Frames
/// are handed out pinned; a page becomes evictable once its pin count
/// drops to zero. Dirty pages leave the pool only through the flush
/// callbacks or as [`EvictedPage`]s.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Frame storage.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// Frames not holding any page.
    free_list: Mutex<Vec<FrameId>>,
    /// Eviction policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM, with a
    /// floor of 1,000 frames so small machines still cache usefully.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let target_bytes = sys.available_memory() as usize / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently cached.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Returns true if the page is cached.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Fetches a cached page, pinning its frame. Returns None on a miss.
    pub fn fetch(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame)
    }

    /// Finds a frame for a new page: free list first, then eviction.
    fn reserve_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim = self
            .replacer
            .evict(|fid| self.frames[fid.0 as usize].pin_count() == 0)
            .ok_or(TernError::BufferPoolFull)?;

        let frame = &self.frames[victim.0 as usize];
        let evicted = match frame.page_id() {
            Some(page_id) if frame.is_dirty() => {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**frame.read_data());
                Some(EvictedPage { page_id, data })
            }
            _ => None,
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.lock().remove(&old_page_id);
        }

        Ok((victim, evicted))
    }

    /// Makes the page resident, pinning its frame. A fresh frame starts
    /// zeroed; an already-cached page keeps its contents. The second
    /// return value is any dirty page evicted to make room, which the
    /// caller must persist.
    pub fn put_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame) = self.fetch(page_id) {
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.reserve_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.lock().insert(page_id, frame_id);
        Ok((frame, evicted))
    }

    /// Makes the page resident with the given contents (a disk read).
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.put_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Releases one pin on the page, optionally marking it dirty. When the
    /// last pin is released the page becomes evictable. Returns false if
    /// the page is not cached.
    pub fn unpin(&self, page_id: PageId, dirty: bool) -> bool {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&fid) => fid,
            None => return false,
        };

        let frame = &self.frames[frame_id.0 as usize];
        if dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Runs `f` over the page's data. The caller must hold a pin.
    pub fn with_page<R>(&self, page_id: PageId, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> Option<R> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let data = frame.read_data();
        Some(f(&data))
    }

    /// Runs `f` over the page's data mutably and marks the page dirty. The
    /// caller must hold a pin.
    pub fn with_page_mut<R>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Option<R> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let mut data = frame.write_data();
        frame.set_dirty(true);
        Some(f(&mut data))
    }

    /// Flushes one page through the callback if it is dirty. Returns true
    /// if a write happened.
    pub fn flush_page<F>(&self, page_id: PageId, mut write_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(false),
        };

        let frame = &self.frames[frame_id.0 as usize];
        if !frame.is_dirty() {
            return Ok(false);
        }
        write_fn(page_id, &**frame.read_data())?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every dirty page belonging to `file_id`. Returns the number
    /// of pages written.
    pub fn flush_file<F>(&self, file_id: u32, mut write_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let targets: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(&pid, &fid)| (pid, fid))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                write_fn(page_id, &**frame.read_data())?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops every unpinned page of `file_id` from the pool without
    /// flushing. Returns the number of pages dropped.
    pub fn drop_file(&self, file_id: u32) -> usize {
        let targets: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(&pid, &fid)| (pid, fid))
            .collect();

        let mut dropped = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                continue;
            }
            self.page_table.lock().remove(&page_id);
            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
            dropped += 1;
        }
        dropped
    }
}
