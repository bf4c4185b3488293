//! The generic B+ tree core: descent, splits, root growth and scan
//! positioning.
//!
//! A `Tree<K>` owns no pages between operations. Each operation descends
//! from the cached root page number, carrying the visited non-leaf pages on
//! a transient path stack; splits propagate back up that stack. Within one
//! insert a node is fully rewritten and unpinned before its parent is
//! touched.

use super::key::IndexKey;
use super::node::{
    leaf_insert_sorted, non_leaf_insert_sorted, swap_page_pair_if_less, swap_rid_pair_if_less,
    IndexHeader, LeafNode, NonLeafNode, PageKeyPair,
};
use crate::bufmgr::{BufferManager, PageGuard};
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tern_common::page::{PageId, HEADER_PAGE_NO, NULL_PAGE_NO};
use tern_common::types::RecordId;
use tern_common::Result;

/// The tree core for one key variant.
pub(crate) struct Tree<K: IndexKey> {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    root_page_no: u32,
    leaf_cap: usize,
    inner_cap: usize,
    _key: PhantomData<K>,
}

/// A positioned scan cursor: the pinned leaf, its decoded image, and the
/// entry the next `scan_next` will consider.
pub(crate) struct ScanPosition<K> {
    pub guard: PageGuard,
    pub leaf: LeafNode<K>,
    pub next_entry: usize,
}

impl<K: IndexKey> Tree<K> {
    /// Creates the initial root for a fresh index file: an empty non-leaf
    /// with `level = 0` whose child slot 0 holds the null sentinel until
    /// the first insert allocates a leaf.
    pub fn create(
        bufmgr: &Arc<BufferManager>,
        file_id: u32,
        leaf_cap: usize,
        inner_cap: usize,
    ) -> Result<Self> {
        let root_guard = bufmgr.alloc_page(file_id)?;
        let root = NonLeafNode::<K>::new(inner_cap, 0);
        root_guard.with_data_mut(|page| root.write_to(page));

        Ok(Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            root_page_no: root_guard.page_no(),
            leaf_cap,
            inner_cap,
            _key: PhantomData,
        })
    }

    /// Attaches to an existing index file.
    pub fn open(
        bufmgr: &Arc<BufferManager>,
        file_id: u32,
        root_page_no: u32,
        leaf_cap: usize,
        inner_cap: usize,
    ) -> Self {
        Self {
            bufmgr: Arc::clone(bufmgr),
            file_id,
            root_page_no,
            leaf_cap,
            inner_cap,
            _key: PhantomData,
        }
    }

    /// Current root page number.
    pub fn root_page_no(&self) -> u32 {
        self.root_page_no
    }

    fn page_id(&self, page_no: u32) -> PageId {
        PageId::new(self.file_id, page_no)
    }

    fn read_leaf(&self, guard: &PageGuard) -> LeafNode<K> {
        guard.with_data(|page| LeafNode::read_from(page, self.leaf_cap))
    }

    fn read_non_leaf(&self, guard: &PageGuard) -> NonLeafNode<K> {
        guard.with_data(|page| NonLeafNode::read_from(page, self.inner_cap))
    }

    /// Inserts one `(key, rid)` entry.
    pub fn insert(&mut self, key: K, rid: RecordId) -> Result<()> {
        let root_guard = self.bufmgr.read_page(self.page_id(self.root_page_no))?;
        let mut root = self.read_non_leaf(&root_guard);

        if root.level == 0 {
            if root.children[0] == NULL_PAGE_NO {
                // Very first insert: allocate the first leaf.
                let leaf_guard = self.bufmgr.alloc_page(self.file_id)?;
                let mut leaf = LeafNode::<K>::new(self.leaf_cap);
                leaf.keys[0] = key;
                leaf.rids[0] = rid;
                leaf.num_keys = 1;
                leaf.right_sib = NULL_PAGE_NO;
                leaf_guard.with_data_mut(|page| leaf.write_to(page));

                root.children[0] = leaf_guard.page_no();
                drop(leaf_guard);
                root_guard.with_data_mut(|page| root.write_to(page));
                return Ok(());
            }

            let leaf_no = root.children[0];
            let leaf_guard = self.bufmgr.read_page(self.page_id(leaf_no))?;
            let mut leaf = self.read_leaf(&leaf_guard);

            if !leaf.is_full() {
                leaf_insert_sorted(&mut leaf, key, rid);
                leaf_guard.with_data_mut(|page| leaf.write_to(page));
                return Ok(());
            }

            // The single leaf overflows: split it and upgrade the
            // placeholder root in place.
            let sep = self.split_leaf(leaf_guard, leaf, key, rid)?;
            root.level = 1;
            root.keys[0] = sep.key;
            root.children[1] = sep.page_no;
            root.num_keys = 1;
            root_guard.with_data_mut(|page| root.write_to(page));
            debug!(
                "first leaf split: root page {} now level 1",
                self.root_page_no
            );
            return Ok(());
        }

        drop(root_guard);

        let (leaf_no, mut path) = self.descend(&key)?;
        let leaf_guard = self.bufmgr.read_page(self.page_id(leaf_no))?;
        let mut leaf = self.read_leaf(&leaf_guard);

        if !leaf.is_full() {
            leaf_insert_sorted(&mut leaf, key, rid);
            leaf_guard.with_data_mut(|page| leaf.write_to(page));
            return Ok(());
        }

        let mut pending = self.split_leaf(leaf_guard, leaf, key, rid)?;

        // Pop parents off the descent path until one absorbs the split.
        while let Some(parent_no) = path.pop() {
            let parent_guard = self.bufmgr.read_page(self.page_id(parent_no))?;
            let mut parent = self.read_non_leaf(&parent_guard);

            if !parent.is_full() {
                non_leaf_insert_sorted(&mut parent, pending);
                parent_guard.with_data_mut(|page| parent.write_to(page));
                return Ok(());
            }

            let promoted = self.split_non_leaf(parent_guard, &mut parent, pending)?;

            if path.is_empty() {
                // The split reached the root.
                return self.grow_root(parent_no, parent.level + 1, promoted);
            }
            pending = promoted;
        }

        Ok(())
    }

    /// Descends from the root (which must be `level >= 1`) to the leaf for
    /// `key`, recording the visited non-leaf page numbers. Equal keys
    /// descend right.
    fn descend(&self, key: &K) -> Result<(u32, Vec<u32>)> {
        let mut path = Vec::new();
        let mut current = self.root_page_no;

        loop {
            let guard = self.bufmgr.read_page(self.page_id(current))?;
            let node = self.read_non_leaf(&guard);
            drop(guard);

            path.push(current);
            let child = node.children[node.child_index(key)];

            if node.level == 1 {
                return Ok((child, path));
            }
            current = child;
        }
    }

    /// Splits a full leaf while inserting `(key, rid)`, using the scratch
    /// overflow slot so the combined `cap + 1` entries stay sorted. Both
    /// leaves are written and unpinned before the separator is returned.
    fn split_leaf(
        &mut self,
        leaf_guard: PageGuard,
        mut leaf: LeafNode<K>,
        key: K,
        rid: RecordId,
    ) -> Result<PageKeyPair<K>> {
        let cap = self.leaf_cap;

        // Set the last entry aside, insert into the remainder, then swap
        // the scratch pair back so it holds the maximum.
        let mut overflow = (leaf.keys[cap - 1], leaf.rids[cap - 1]);
        leaf.num_keys = cap - 1;
        leaf_insert_sorted(&mut leaf, key, rid);

        let mut last = (leaf.keys[cap - 1], leaf.rids[cap - 1]);
        swap_rid_pair_if_less(&mut overflow, &mut last);
        leaf.keys[cap - 1] = last.0;
        leaf.rids[cap - 1] = last.1;

        let new_guard = self.bufmgr.alloc_page(self.file_id)?;
        let new_no = new_guard.page_no();

        let k = (cap + 1) / 2;
        let sep_key = leaf.keys[k];

        let mut right = LeafNode::<K>::new(cap);
        let moved = cap - k;
        right.keys[..moved].copy_from_slice(&leaf.keys[k..cap]);
        right.rids[..moved].copy_from_slice(&leaf.rids[k..cap]);
        right.keys[moved] = overflow.0;
        right.rids[moved] = overflow.1;
        right.num_keys = moved + 1;

        // Splice the new leaf into the sibling chain.
        right.right_sib = leaf.right_sib;
        leaf.right_sib = new_no;
        leaf.num_keys = k;

        leaf_guard.with_data_mut(|page| leaf.write_to(page));
        drop(leaf_guard);
        new_guard.with_data_mut(|page| right.write_to(page));
        drop(new_guard);

        Ok(PageKeyPair {
            page_no: new_no,
            key: sep_key,
        })
    }

    /// Splits a full non-leaf while inserting `pending`. The middle key at
    /// `k = (cap + 1) / 2` is promoted: the left node keeps `keys[0..k]`,
    /// the right receives `keys[k+1..]` plus the overflow pair, and the
    /// promoted key is stored in neither.
    fn split_non_leaf(
        &mut self,
        node_guard: PageGuard,
        node: &mut NonLeafNode<K>,
        pending: PageKeyPair<K>,
    ) -> Result<PageKeyPair<K>> {
        let cap = self.inner_cap;

        let mut overflow = PageKeyPair {
            page_no: node.children[cap],
            key: node.keys[cap - 1],
        };
        node.num_keys = cap - 1;
        non_leaf_insert_sorted(node, pending);

        let mut last = PageKeyPair {
            page_no: node.children[cap],
            key: node.keys[cap - 1],
        };
        swap_page_pair_if_less(&mut overflow, &mut last);
        node.keys[cap - 1] = last.key;
        node.children[cap] = last.page_no;

        let new_guard = self.bufmgr.alloc_page(self.file_id)?;
        let new_no = new_guard.page_no();

        let k = (cap + 1) / 2;
        let promoted_key = node.keys[k];

        let mut right = NonLeafNode::<K>::new(cap, node.level);
        let moved = cap - 1 - k;
        right.keys[..moved].copy_from_slice(&node.keys[k + 1..cap]);
        right.keys[moved] = overflow.key;
        right.children[..moved + 1].copy_from_slice(&node.children[k + 1..cap + 1]);
        right.children[moved + 1] = overflow.page_no;
        right.num_keys = moved + 1;

        node.num_keys = k;

        node_guard.with_data_mut(|page| node.write_to(page));
        drop(node_guard);
        new_guard.with_data_mut(|page| right.write_to(page));
        drop(new_guard);

        Ok(PageKeyPair {
            page_no: new_no,
            key: promoted_key,
        })
    }

    /// Installs a brand-new root above a split old root and updates the
    /// header's root pointer before returning.
    fn grow_root(&mut self, old_root_no: u32, new_level: u32, promoted: PageKeyPair<K>) -> Result<()> {
        let new_guard = self.bufmgr.alloc_page(self.file_id)?;
        let new_no = new_guard.page_no();

        let mut new_root = NonLeafNode::<K>::new(self.inner_cap, new_level);
        new_root.keys[0] = promoted.key;
        new_root.children[0] = old_root_no;
        new_root.children[1] = promoted.page_no;
        new_root.num_keys = 1;
        new_guard.with_data_mut(|page| new_root.write_to(page));
        drop(new_guard);

        self.root_page_no = new_no;

        let header_guard = self.bufmgr.read_page(self.page_id(HEADER_PAGE_NO))?;
        header_guard.with_data_mut(|page| IndexHeader::write_root_page_no(page, new_no));

        debug!("root split: new root page {} at level {}", new_no, new_level);
        Ok(())
    }

    /// Positions a scan at the first entry satisfying the lower bound:
    /// `keys[i] >= low` when `inclusive`, strictly greater otherwise.
    /// Searches the leaf the descent lands on and then its right sibling
    /// once. Returns None if the tree is empty or nothing qualifies there.
    pub fn find_scan_start(&self, low: &K, inclusive: bool) -> Result<Option<ScanPosition<K>>> {
        let root_guard = self.bufmgr.read_page(self.page_id(self.root_page_no))?;
        let root = self.read_non_leaf(&root_guard);

        let leaf_no = if root.level == 0 {
            let child = root.children[0];
            drop(root_guard);
            if child == NULL_PAGE_NO {
                return Ok(None);
            }
            child
        } else {
            drop(root_guard);
            self.descend(low)?.0
        };

        let guard = self.bufmgr.read_page(self.page_id(leaf_no))?;
        let leaf = self.read_leaf(&guard);

        if let Some(i) = Self::position_in_leaf(&leaf, low, inclusive) {
            return Ok(Some(ScanPosition {
                guard,
                leaf,
                next_entry: i,
            }));
        }

        // Every key here orders at or below the bound; the qualifying
        // entry can only be in the right sibling.
        let sib = leaf.right_sib;
        drop(guard);
        if sib == NULL_PAGE_NO {
            return Ok(None);
        }

        let guard = self.bufmgr.read_page(self.page_id(sib))?;
        let leaf = self.read_leaf(&guard);
        if let Some(i) = Self::position_in_leaf(&leaf, low, inclusive) {
            return Ok(Some(ScanPosition {
                guard,
                leaf,
                next_entry: i,
            }));
        }
        Ok(None)
    }

    /// Re-pins the leaf at `page_no` for cursor advancement.
    pub fn pin_leaf(&self, page_no: u32) -> Result<(PageGuard, LeafNode<K>)> {
        let guard = self.bufmgr.read_page(self.page_id(page_no))?;
        let leaf = self.read_leaf(&guard);
        Ok((guard, leaf))
    }

    fn position_in_leaf(leaf: &LeafNode<K>, low: &K, inclusive: bool) -> Option<usize> {
        (0..leaf.num_keys).find(|&i| {
            let cmp = leaf.keys[i].key_cmp(low);
            if inclusive {
                cmp.is_ge()
            } else {
                cmp.is_gt()
            }
        })
    }
}
