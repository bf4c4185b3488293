//! The public B+ tree index: lifecycle, inserts, and range scans.

use super::key::{max_inner_capacity, max_leaf_capacity, FixedStr, IndexKey, KeyValue};
use super::node::{IndexHeader, LeafNode};
use super::tree::Tree;
use crate::blob::BlobFile;
use crate::bufmgr::{BufferManager, PageGuard};
use crate::relation::RelationFile;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tern_common::config::IndexConfig;
use tern_common::page::{PageId, HEADER_PAGE_NO, NULL_PAGE_NO};
use tern_common::types::{AttrType, Operator, RecordId};
use tern_common::{Result, TernError};

/// A disk-resident B+ tree secondary index over one attribute of a
/// fixed-record relation.
///
/// Opening derives the index file name from the relation and attribute
/// offset. A missing file is created and bulk-loaded from the relation; an
/// existing file is verified against the constructor arguments and reused.
/// Dropping the index flushes it and, under the default configuration,
/// removes the file.
pub struct BTreeIndex {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    index_path: PathBuf,
    relation_name: String,
    attr_byte_offset: u32,
    attr_type: AttrType,
    delete_on_teardown: bool,
    core: TypedCore,
}

/// The single dispatch point from the runtime key tag to the generic core.
enum TypedCore {
    Int(Core<i32>),
    Double(Core<f64>),
    Str(Core<FixedStr>),
}

impl BTreeIndex {
    /// Opens or creates the index for `relation` on the attribute at
    /// `attr_byte_offset`, with the default configuration.
    pub fn open(
        bufmgr: &Arc<BufferManager>,
        relation: &RelationFile,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> Result<Self> {
        Self::open_with(
            bufmgr,
            relation,
            attr_byte_offset,
            attr_type,
            IndexConfig::default(),
        )
    }

    /// Opens or creates the index with an explicit configuration.
    pub fn open_with(
        bufmgr: &Arc<BufferManager>,
        relation: &RelationFile,
        attr_byte_offset: u32,
        attr_type: AttrType,
        config: IndexConfig,
    ) -> Result<Self> {
        let relation_name = relation_display_name(relation.path());
        let index_path =
            PathBuf::from(format!("{}.{}", relation.path().display(), attr_byte_offset));

        let (leaf_cap, inner_cap) = resolve_capacities(attr_type, &config)?;

        if BlobFile::exists(&index_path) {
            Self::open_existing(
                bufmgr,
                &index_path,
                &relation_name,
                attr_byte_offset,
                attr_type,
                &config,
            )
        } else {
            let mut index = Self::create_empty(
                bufmgr,
                &index_path,
                &relation_name,
                attr_byte_offset,
                attr_type,
                leaf_cap,
                inner_cap,
                config.delete_on_teardown,
            )?;
            index.build_from(relation)?;
            Ok(index)
        }
    }

    fn open_existing(
        bufmgr: &Arc<BufferManager>,
        index_path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
        config: &IndexConfig,
    ) -> Result<Self> {
        let file_id = bufmgr.register_file(BlobFile::open(index_path, bufmgr.fsync_enabled())?);

        let header = match Self::verify_header(
            bufmgr,
            file_id,
            relation_name,
            attr_byte_offset,
            attr_type,
            config,
        ) {
            Ok(header) => header,
            Err(e) => {
                // Do not leave a rejected file registered.
                let _ = bufmgr.dispose_file(file_id);
                return Err(e);
            }
        };

        let leaf_cap = header.leaf_capacity as usize;
        let inner_cap = header.inner_capacity as usize;
        let root = header.root_page_no;

        debug!(
            "opened index {} (root page {}, {} keys/leaf)",
            index_path.display(),
            root,
            leaf_cap
        );

        let core = match attr_type {
            AttrType::Integer => {
                TypedCore::Int(Core::open(bufmgr, file_id, root, leaf_cap, inner_cap))
            }
            AttrType::Double => {
                TypedCore::Double(Core::open(bufmgr, file_id, root, leaf_cap, inner_cap))
            }
            AttrType::String => {
                TypedCore::Str(Core::open(bufmgr, file_id, root, leaf_cap, inner_cap))
            }
        };

        Ok(Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            index_path: index_path.to_path_buf(),
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            delete_on_teardown: config.delete_on_teardown,
            core,
        })
    }

    fn verify_header(
        bufmgr: &Arc<BufferManager>,
        file_id: u32,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
        config: &IndexConfig,
    ) -> Result<IndexHeader> {
        let guard = bufmgr.read_page(PageId::new(file_id, HEADER_PAGE_NO))?;
        let header = guard.with_data(IndexHeader::read_from)?;
        drop(guard);

        let mut mismatches = Vec::new();
        if header.relation_name != truncate_name(relation_name) {
            mismatches.push(format!(
                "relation {:?} stored, {:?} requested",
                header.relation_name, relation_name
            ));
        }
        if header.attr_byte_offset != attr_byte_offset {
            mismatches.push(format!(
                "offset {} stored, {} requested",
                header.attr_byte_offset, attr_byte_offset
            ));
        }
        if header.attr_type != attr_type {
            mismatches.push(format!(
                "attribute type {} stored, {} requested",
                header.attr_type, attr_type
            ));
        }
        if let Some(cap) = config.leaf_capacity {
            if header.leaf_capacity as usize != cap {
                mismatches.push(format!(
                    "leaf capacity {} stored, {} requested",
                    header.leaf_capacity, cap
                ));
            }
        }
        if let Some(cap) = config.inner_capacity {
            if header.inner_capacity as usize != cap {
                mismatches.push(format!(
                    "inner capacity {} stored, {} requested",
                    header.inner_capacity, cap
                ));
            }
        }

        let width = attr_type.key_width();
        if (header.leaf_capacity as usize) < 2
            || header.leaf_capacity as usize > max_leaf_capacity(width)
            || (header.inner_capacity as usize) < 2
            || header.inner_capacity as usize > max_inner_capacity(width)
            || header.root_page_no == NULL_PAGE_NO
        {
            mismatches.push("header carries impossible geometry".to_string());
        }

        if mismatches.is_empty() {
            Ok(header)
        } else {
            Err(TernError::BadIndexInfo(mismatches.join("; ")))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_empty(
        bufmgr: &Arc<BufferManager>,
        index_path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
        leaf_cap: usize,
        inner_cap: usize,
        delete_on_teardown: bool,
    ) -> Result<Self> {
        let file_id = bufmgr.register_file(BlobFile::create(index_path, bufmgr.fsync_enabled())?);

        // Page 0 is reserved so 0 stays the null page sentinel; page 1 is
        // the header; the root lands on page 2.
        drop(bufmgr.alloc_page(file_id)?);
        let header_guard = bufmgr.alloc_page(file_id)?;

        let (core, root_page_no) = match attr_type {
            AttrType::Integer => {
                let core = Core::<i32>::create(bufmgr, file_id, leaf_cap, inner_cap)?;
                let root = core.tree.root_page_no();
                (TypedCore::Int(core), root)
            }
            AttrType::Double => {
                let core = Core::<f64>::create(bufmgr, file_id, leaf_cap, inner_cap)?;
                let root = core.tree.root_page_no();
                (TypedCore::Double(core), root)
            }
            AttrType::String => {
                let core = Core::<FixedStr>::create(bufmgr, file_id, leaf_cap, inner_cap)?;
                let root = core.tree.root_page_no();
                (TypedCore::Str(core), root)
            }
        };

        let header = IndexHeader {
            relation_name: truncate_name(relation_name),
            attr_byte_offset,
            attr_type,
            root_page_no,
            leaf_capacity: leaf_cap as u32,
            inner_capacity: inner_cap as u32,
        };
        header_guard.with_data_mut(|page| header.write_to(page));
        drop(header_guard);

        debug!(
            "created index {} ({} keys/leaf, {} keys/node)",
            index_path.display(),
            leaf_cap,
            inner_cap
        );

        Ok(Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            index_path: index_path.to_path_buf(),
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            delete_on_teardown,
            core,
        })
    }

    /// Inserts every record of the relation, extracting the key at the
    /// configured offset. The scanner's end-of-file is the loop's normal
    /// termination, not an error.
    fn build_from(&mut self, relation: &RelationFile) -> Result<()> {
        let mut scan = relation.scan()?;
        let mut entries = 0u64;

        loop {
            let (rid, record) = match scan.next_record() {
                Ok(next) => next,
                Err(TernError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let key =
                KeyValue::from_record(self.attr_type, &record, self.attr_byte_offset as usize)?;
            self.insert(&key, rid)?;
            entries += 1;
        }

        debug!(
            "built index {} from {} records",
            self.index_path.display(),
            entries
        );
        Ok(())
    }

    /// Path of the index file this index lives in.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Name of the relation the index was built over.
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Key variant of this index.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Current root page number.
    pub fn root_page_no(&self) -> u32 {
        match &self.core {
            TypedCore::Int(core) => core.tree.root_page_no(),
            TypedCore::Double(core) => core.tree.root_page_no(),
            TypedCore::Str(core) => core.tree.root_page_no(),
        }
    }

    /// Inserts one `(key, rid)` entry.
    pub fn insert(&mut self, key: &KeyValue, rid: RecordId) -> Result<()> {
        let expected = self.attr_type;
        match (&mut self.core, key) {
            (TypedCore::Int(core), KeyValue::Int(k)) => core.tree.insert(*k, rid),
            (TypedCore::Double(core), KeyValue::Double(k)) => core.tree.insert(*k, rid),
            (TypedCore::Str(core), KeyValue::Str(k)) => core.tree.insert(*k, rid),
            _ => Err(key_type_mismatch(expected, key.attr_type())),
        }
    }

    /// Begins a range scan over keys satisfying `low_op low` and
    /// `high_op high`. Any scan already in progress is ended first.
    pub fn start_scan(
        &mut self,
        low: &KeyValue,
        low_op: Operator,
        high: &KeyValue,
        high_op: Operator,
    ) -> Result<()> {
        if self.has_scan() {
            self.end_scan()?;
        }

        if !low_op.is_lower_bound() || !high_op.is_upper_bound() {
            return Err(TernError::BadOpcodes);
        }

        let expected = self.attr_type;
        match (&mut self.core, low, high) {
            (TypedCore::Int(core), KeyValue::Int(l), KeyValue::Int(h)) => {
                core.start_scan(*l, low_op, *h, high_op)
            }
            (TypedCore::Double(core), KeyValue::Double(l), KeyValue::Double(h)) => {
                core.start_scan(*l, low_op, *h, high_op)
            }
            (TypedCore::Str(core), KeyValue::Str(l), KeyValue::Str(h)) => {
                core.start_scan(*l, low_op, *h, high_op)
            }
            (_, l, h) => {
                let found = if l.attr_type() == expected {
                    h.attr_type()
                } else {
                    l.attr_type()
                };
                Err(key_type_mismatch(expected, found))
            }
        }
    }

    /// Yields the RID of the next entry in the scan range.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        match &mut self.core {
            TypedCore::Int(core) => core.scan_next(),
            TypedCore::Double(core) => core.scan_next(),
            TypedCore::Str(core) => core.scan_next(),
        }
    }

    /// Ends the scan in progress, releasing its pinned leaf.
    pub fn end_scan(&mut self) -> Result<()> {
        match &mut self.core {
            TypedCore::Int(core) => core.end_scan(),
            TypedCore::Double(core) => core.end_scan(),
            TypedCore::Str(core) => core.end_scan(),
        }
    }

    fn has_scan(&self) -> bool {
        match &self.core {
            TypedCore::Int(core) => core.cursor.is_some(),
            TypedCore::Double(core) => core.cursor.is_some(),
            TypedCore::Str(core) => core.cursor.is_some(),
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if self.has_scan() {
            let _ = self.end_scan();
        }
        if let Err(e) = self.bufmgr.dispose_file(self.file_id) {
            warn!("failed to flush index {}: {}", self.index_path.display(), e);
        }
        if self.delete_on_teardown {
            if let Err(e) = BlobFile::remove(&self.index_path) {
                warn!(
                    "failed to remove index {}: {}",
                    self.index_path.display(),
                    e
                );
            }
        }
    }
}

/// Generic machinery shared by all key variants: the tree plus the scan
/// cursor state machine.
struct Core<K: IndexKey> {
    tree: Tree<K>,
    cursor: Option<Cursor<K>>,
}

/// An executing scan. The current leaf stays pinned through `guard`, which
/// exists purely for its drop; `next_entry` of None marks a cursor that ran
/// off the sibling chain.
struct Cursor<K> {
    high: K,
    high_op: Operator,
    #[allow(dead_code)]
    guard: PageGuard,
    leaf: LeafNode<K>,
    next_entry: Option<usize>,
}

impl<K: IndexKey> Core<K> {
    fn create(
        bufmgr: &Arc<BufferManager>,
        file_id: u32,
        leaf_cap: usize,
        inner_cap: usize,
    ) -> Result<Self> {
        Ok(Self {
            tree: Tree::create(bufmgr, file_id, leaf_cap, inner_cap)?,
            cursor: None,
        })
    }

    fn open(
        bufmgr: &Arc<BufferManager>,
        file_id: u32,
        root_page_no: u32,
        leaf_cap: usize,
        inner_cap: usize,
    ) -> Self {
        Self {
            tree: Tree::open(bufmgr, file_id, root_page_no, leaf_cap, inner_cap),
            cursor: None,
        }
    }

    fn start_scan(&mut self, low: K, low_op: Operator, high: K, high_op: Operator) -> Result<()> {
        if low.key_cmp(&high).is_gt() {
            return Err(TernError::BadScanrange);
        }

        let position = self
            .tree
            .find_scan_start(&low, low_op == Operator::GTE)?
            .ok_or(TernError::NoSuchKeyFound)?;

        // The first qualifying entry must also satisfy the upper bound,
        // otherwise the range is empty.
        let first_key = position.leaf.keys[position.next_entry];
        if !upper_satisfied(&first_key, &high, high_op) {
            return Err(TernError::NoSuchKeyFound);
        }

        self.cursor = Some(Cursor {
            high,
            high_op,
            guard: position.guard,
            leaf: position.leaf,
            next_entry: Some(position.next_entry),
        });
        Ok(())
    }

    fn scan_next(&mut self) -> Result<RecordId> {
        let cursor = self.cursor.as_mut().ok_or(TernError::ScanNotInitialized)?;
        let entry = cursor.next_entry.ok_or(TernError::IndexScanCompleted)?;

        let key = cursor.leaf.keys[entry];
        if !upper_satisfied(&key, &cursor.high, cursor.high_op) {
            return Err(TernError::IndexScanCompleted);
        }
        let rid = cursor.leaf.rids[entry];

        if entry + 1 < cursor.leaf.num_keys {
            cursor.next_entry = Some(entry + 1);
        } else {
            let sib = cursor.leaf.right_sib;
            if sib == NULL_PAGE_NO {
                // Exhausted; the last leaf stays pinned until end_scan.
                cursor.next_entry = None;
            } else {
                let (guard, leaf) = self.tree.pin_leaf(sib)?;
                cursor.guard = guard;
                cursor.leaf = leaf;
                cursor.next_entry = Some(0);
            }
        }

        Ok(rid)
    }

    fn end_scan(&mut self) -> Result<()> {
        // Dropping the cursor releases the leaf pin.
        self.cursor
            .take()
            .map(|_| ())
            .ok_or(TernError::ScanNotInitialized)
    }
}

fn upper_satisfied<K: IndexKey>(key: &K, high: &K, op: Operator) -> bool {
    match op {
        Operator::LT => key.key_cmp(high).is_lt(),
        Operator::LTE => key.key_cmp(high).is_le(),
        _ => false,
    }
}

fn relation_display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn key_type_mismatch(expected: AttrType, found: AttrType) -> TernError {
    TernError::KeyTypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// Header names are capped at 31 bytes, matching the header layout.
fn truncate_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let len = bytes.len().min(31);
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

fn resolve_capacities(attr_type: AttrType, config: &IndexConfig) -> Result<(usize, usize)> {
    let width = attr_type.key_width();
    let max_leaf = max_leaf_capacity(width);
    let max_inner = max_inner_capacity(width);

    let leaf_cap = config.leaf_capacity.unwrap_or(max_leaf);
    let inner_cap = config.inner_capacity.unwrap_or(max_inner);

    if leaf_cap < 2 || leaf_cap > max_leaf {
        return Err(TernError::Config(format!(
            "leaf capacity {} outside 2..={}",
            leaf_cap, max_leaf
        )));
    }
    if inner_cap < 2 || inner_cap > max_inner {
        return Err(TernError::Config(format!(
            "inner capacity {} outside 2..={}",
            inner_cap, max_inner
        )));
    }
    Ok((leaf_cap, inner_cap))
}
