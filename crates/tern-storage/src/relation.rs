//! Fixed-record relation files and their scanner.
//!
//! A relation file stores records of one fixed size. Page 0 holds the
//! record size; every later page holds a record count followed by packed
//! records. The scanner yields `(RecordId, bytes)` in file order and
//! signals exhaustion with `TernError::EndOfFile`, which index builds treat
//! as termination rather than failure.

use crate::blob::BlobFile;
use crate::bufmgr::{BufferManager, PageGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::types::RecordId;
use tern_common::{Result, TernError};

/// Bytes at the head of each data page: record count (u16) + 2 reserved.
const DATA_PAGE_HEADER: usize = 4;

/// A relation file of fixed-size records, accessed through the buffer
/// manager.
pub struct RelationFile {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    path: PathBuf,
    record_size: usize,
    records_per_page: usize,
}

impl RelationFile {
    /// Creates a relation file for records of `record_size` bytes.
    pub fn create(
        bufmgr: &Arc<BufferManager>,
        path: impl AsRef<Path>,
        record_size: usize,
    ) -> Result<Self> {
        if record_size == 0 || record_size > PAGE_SIZE - DATA_PAGE_HEADER {
            return Err(TernError::InvalidRecord(format!(
                "record size {} does not fit a page",
                record_size
            )));
        }

        let path = path.as_ref().to_path_buf();
        let file_id = bufmgr.register_file(BlobFile::create(&path, bufmgr.fsync_enabled())?);

        // Page 0: record size.
        let header = bufmgr.alloc_page(file_id)?;
        header.with_data_mut(|data| {
            data[0..4].copy_from_slice(&(record_size as u32).to_le_bytes());
        });

        Ok(Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            path,
            record_size,
            records_per_page: (PAGE_SIZE - DATA_PAGE_HEADER) / record_size,
        })
    }

    /// Opens an existing relation file.
    pub fn open(bufmgr: &Arc<BufferManager>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_id = bufmgr.register_file(BlobFile::open(&path, bufmgr.fsync_enabled())?);

        let header = bufmgr.read_page(PageId::new(file_id, 0))?;
        let record_size =
            header.with_data(|data| u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
                as usize;
        if record_size == 0 || record_size > PAGE_SIZE - DATA_PAGE_HEADER {
            return Err(TernError::InvalidRecord(format!(
                "relation header carries record size {}",
                record_size
            )));
        }

        Ok(Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            path,
            record_size,
            records_per_page: (PAGE_SIZE - DATA_PAGE_HEADER) / record_size,
        })
    }

    /// Returns the record size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record and returns its identifier.
    pub fn append(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() != self.record_size {
            return Err(TernError::InvalidRecord(format!(
                "record is {} bytes, relation holds {}-byte records",
                record.len(),
                self.record_size
            )));
        }

        let num_pages = self.bufmgr.file(self.file_id)?.num_pages();

        // Reuse the last data page if it still has room.
        if num_pages > 1 {
            let page_no = num_pages - 1;
            let guard = self.bufmgr.read_page(PageId::new(self.file_id, page_no))?;
            let count = read_record_count(&guard);
            if (count as usize) < self.records_per_page {
                write_record(&guard, count, record, self.record_size);
                return Ok(RecordId::new(page_no, count));
            }
        }

        let guard = self.bufmgr.alloc_page(self.file_id)?;
        write_record(&guard, 0, record, self.record_size);
        Ok(RecordId::new(guard.page_no(), 0))
    }

    /// Starts a scan over every record in file order.
    pub fn scan(&self) -> Result<RelationScan> {
        Ok(RelationScan {
            bufmgr: Arc::clone(&self.bufmgr),
            file_id: self.file_id,
            record_size: self.record_size,
            num_pages: self.bufmgr.file(self.file_id)?.num_pages(),
            current: None,
            page_no: 0,
            slot_no: 0,
        })
    }
}

fn read_record_count(guard: &PageGuard) -> u16 {
    guard.with_data(|data| u16::from_le_bytes([data[0], data[1]]))
}

fn write_record(guard: &PageGuard, slot_no: u16, record: &[u8], record_size: usize) {
    guard.with_data_mut(|data| {
        let offset = DATA_PAGE_HEADER + slot_no as usize * record_size;
        data[offset..offset + record_size].copy_from_slice(record);
        data[0..2].copy_from_slice(&(slot_no + 1).to_le_bytes());
    });
}

/// Forward scan over a relation file.
///
/// The scanner keeps its current page pinned between calls and releases it
/// when it advances or is dropped.
pub struct RelationScan {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    record_size: usize,
    num_pages: u32,
    current: Option<PageGuard>,
    page_no: u32,
    slot_no: u16,
}

impl RelationScan {
    /// Yields the next record and its identifier, or `EndOfFile` once the
    /// relation is exhausted.
    pub fn next_record(&mut self) -> Result<(RecordId, Vec<u8>)> {
        loop {
            let guard = match self.current.as_ref() {
                Some(guard) => guard,
                None => {
                    // Data pages start at 1; page 0 is the header.
                    let next_page = self.page_no.max(1);
                    if next_page >= self.num_pages {
                        return Err(TernError::EndOfFile);
                    }
                    self.page_no = next_page;
                    self.slot_no = 0;
                    let guard = self
                        .bufmgr
                        .read_page(PageId::new(self.file_id, next_page))?;
                    self.current = Some(guard);
                    continue;
                }
            };

            let count = read_record_count(guard);
            if self.slot_no >= count {
                self.current = None;
                self.page_no += 1;
                continue;
            }

            let slot_no = self.slot_no;
            let record = guard.with_data(|data| {
                let offset = DATA_PAGE_HEADER + slot_no as usize * self.record_size;
                data[offset..offset + self.record_size].to_vec()
            });
            self.slot_no += 1;
            return Ok((RecordId::new(self.page_no, slot_no), record));
        }
    }
}
