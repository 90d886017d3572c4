//! Disk-resident B+ tree index over the buffer pool.

use crate::header::HeaderPage;
use crate::iterator::TreeIterator;
use crate::node::{self, internal_capacity, leaf_capacity, InternalNode, LeafNode, NodeType};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use vellum_buffer::{BufferFrame, BufferPoolManager};
use vellum_common::page::PageId;
use vellum_common::{IndexKey, RecordId, Result, VellumError};

/// Disk-resident B+ tree mapping unique fixed-width keys to record ids.
///
/// Internal pages direct the search and leaf pages hold the data; leaves
/// are chained left to right for range scans. The tree grows on insert
/// (splitting full pages) and shrinks on remove (merging or rebalancing
/// underflowing pages), adjusting the root as levels appear or vanish.
/// The current root page id is registered under the index name in the
/// header page, so an index can be reopened by name.
///
/// Every page access goes through the buffer pool: pages touched by an
/// operation stay pinned for its duration and are unpinned exactly once,
/// with the dirty flag reflecting whether they were modified.
///
/// The tree is single-writer with no concurrent readers: callers
/// serialize tree operations (and live iterators) externally. The buffer
/// pool underneath remains safe to share with other components.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    root_page_id: AtomicI32,
    pool: Arc<BufferPoolManager>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Creates a new empty index registered under `name`, with page
    /// capacities derived from the page size.
    pub fn create(name: impl Into<String>, pool: Arc<BufferPoolManager>) -> Result<Self> {
        let leaf_max = leaf_capacity::<K>() as u32;
        let internal_max = (internal_capacity::<K>() - 1) as u32;
        Self::create_with_max_sizes(name, pool, leaf_max, internal_max)
    }

    /// Creates a new empty index with explicit page capacities.
    ///
    /// Small capacities force early splits and merges; tests use this to
    /// exercise deep trees with few keys.
    pub fn create_with_max_sizes(
        name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        if leaf_max_size < 2 || leaf_max_size as usize > leaf_capacity::<K>() {
            return Err(VellumError::ConfigError(format!(
                "leaf max size {leaf_max_size} out of range"
            )));
        }
        if internal_max_size < 3 || internal_max_size as usize >= internal_capacity::<K>() {
            return Err(VellumError::ConfigError(format!(
                "internal max size {internal_max_size} out of range"
            )));
        }

        Self::ensure_header_page(&pool)?;

        let frame = pool.fetch_page(PageId::HEADER)?;
        let registered = {
            let mut guard = frame.write_data();
            let mut header = HeaderPage::attach(&mut guard);
            header.insert_record(&name, PageId::INVALID)
        };
        pool.unpin_page(PageId::HEADER, true);
        registered?;

        Ok(Self {
            index_name: name,
            root_page_id: AtomicI32::new(PageId::INVALID.0),
            pool,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Opens an existing index by name, rebinding to the root recorded in
    /// the header page.
    ///
    /// Page capacities must match the ones the index was created with;
    /// they are part of the caller's schema, not persisted here.
    pub fn open(
        name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        Self::ensure_header_page(&pool)?;

        let frame = pool.fetch_page(PageId::HEADER)?;
        let root = {
            let mut guard = frame.write_data();
            let header = HeaderPage::attach(&mut guard);
            header.root_of(&name)
        };
        pool.unpin_page(PageId::HEADER, false);

        match root {
            Some(root) => Ok(Self {
                index_name: name,
                root_page_id: AtomicI32::new(root.0),
                pool,
                leaf_max_size,
                internal_max_size,
                _marker: PhantomData,
            }),
            None => Err(VellumError::IndexNotFound(name)),
        }
    }

    /// Allocates the header page on a fresh data file.
    fn ensure_header_page(pool: &BufferPoolManager) -> Result<()> {
        if pool.disk().num_pages() == 0 {
            let (_, page_id) = pool.new_page()?;
            debug_assert_eq!(page_id, PageId::HEADER);
            pool.unpin_page(page_id, true);
        }
        Ok(())
    }

    /// Returns the name this index is registered under.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true if this B+ tree has no keys.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id.0, Ordering::Release);
    }

    /// Rewrites this index's root record in the header page.
    fn update_root_record(&self) -> Result<()> {
        let frame = self.pool.fetch_page(PageId::HEADER)?;
        let updated = {
            let mut guard = frame.write_data();
            let mut header = HeaderPage::attach(&mut guard);
            header.update_record(&self.index_name, self.root_page_id())
        };
        self.pool.unpin_page(PageId::HEADER, true);
        updated
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup. Returns the record id stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Option<RecordId>> {
        if self.is_empty() {
            return Ok(None);
        }

        let frame = self.find_leaf(key)?;
        let found = {
            let mut guard = frame.write_data();
            let leaf = LeafNode::<K>::attach(&mut guard);
            leaf.lookup(key)
        };
        self.pool.unpin_page(frame.page_id(), false);
        Ok(found)
    }

    /// Descends from the root to the leaf covering `key`.
    ///
    /// Returns the leaf's frame, pinned. Interior pages along the path
    /// are unpinned as soon as the next child is pinned.
    fn find_leaf(&self, key: &K) -> Result<&BufferFrame> {
        let mut frame = self.pool.fetch_page(self.root_page_id())?;
        loop {
            let child = {
                let mut guard = frame.write_data();
                match node::node_type(&guard) {
                    Some(NodeType::Leaf) => None,
                    Some(NodeType::Internal) => {
                        let internal = InternalNode::<K>::attach(&mut guard);
                        Some(internal.lookup(key))
                    }
                    None => {
                        drop(guard);
                        let page_id = frame.page_id();
                        self.pool.unpin_page(page_id, false);
                        return Err(corrupted(format!("page {page_id} is not a tree node")));
                    }
                }
            };

            let child = match child {
                Some(child) => child,
                None => return Ok(frame),
            };

            let page_id = frame.page_id();
            let child_frame = match self.pool.fetch_page(child) {
                Ok(child_frame) => child_frame,
                Err(e) => {
                    self.pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            self.pool.unpin_page(page_id, false);
            frame = child_frame;
        }
    }

    /// Descends along the leftmost edge to the first leaf, returning its
    /// page id unpinned.
    fn find_leftmost_leaf(&self) -> Result<PageId> {
        let mut frame = self.pool.fetch_page(self.root_page_id())?;
        loop {
            let child = {
                let mut guard = frame.write_data();
                match node::node_type(&guard) {
                    Some(NodeType::Leaf) => None,
                    Some(NodeType::Internal) => {
                        let internal = InternalNode::<K>::attach(&mut guard);
                        Some(internal.value_at(0))
                    }
                    None => {
                        drop(guard);
                        let page_id = frame.page_id();
                        self.pool.unpin_page(page_id, false);
                        return Err(corrupted(format!("page {page_id} is not a tree node")));
                    }
                }
            };

            let page_id = frame.page_id();
            let child = match child {
                Some(child) => child,
                None => {
                    self.pool.unpin_page(page_id, false);
                    return Ok(page_id);
                }
            };

            let child_frame = match self.pool.fetch_page(child) {
                Ok(child_frame) => child_frame,
                Err(e) => {
                    self.pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            self.pool.unpin_page(page_id, false);
            frame = child_frame;
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a key/record pair.
    ///
    /// Returns false (leaving the tree unchanged) if `key` is already
    /// present; only unique keys are supported.
    pub fn insert(&self, key: K, value: RecordId) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value)
    }

    /// Plants a single-leaf tree holding the first entry.
    fn start_new_tree(&self, key: K, value: RecordId) -> Result<()> {
        let (frame, page_id) = self.pool.new_page()?;
        {
            let mut guard = frame.write_data();
            let mut leaf =
                LeafNode::<K>::init(&mut guard, page_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert(key, value);
        }
        self.pool.unpin_page(page_id, true);

        self.set_root_page_id(page_id);
        self.update_root_record()
    }

    fn insert_into_leaf(&self, key: K, value: RecordId) -> Result<bool> {
        let frame = self.find_leaf(&key)?;
        let page_id = frame.page_id();

        let inserted = {
            let mut guard = frame.write_data();
            let mut leaf = LeafNode::<K>::attach(&mut guard);
            match leaf.insert(key, value) {
                None => None,
                Some(_) => Some(leaf.is_full()),
            }
        };

        match inserted {
            None => {
                self.pool.unpin_page(page_id, false);
                Ok(false)
            }
            Some(needs_split) => {
                let result = if needs_split {
                    self.split_leaf(frame)
                } else {
                    Ok(())
                };
                self.pool.unpin_page(page_id, true);
                result.map(|()| true)
            }
        }
    }

    /// Splits a full leaf, splicing the new page into the sibling chain
    /// and posting the separator to the parent.
    fn split_leaf(&self, frame: &BufferFrame) -> Result<()> {
        let page_id = frame.page_id();
        let (new_frame, new_page_id) = self.pool.new_page()?;

        let (separator, parent) = {
            let mut left_guard = frame.write_data();
            let mut right_guard = new_frame.write_data();
            let mut left = LeafNode::<K>::attach(&mut left_guard);
            let mut right = LeafNode::<K>::init(
                &mut right_guard,
                new_page_id,
                PageId::INVALID,
                self.leaf_max_size,
            );

            left.move_half_to(&mut right);
            right.set_next_page_id(left.next_page_id());
            left.set_next_page_id(new_page_id);

            (right.key_at(0), left.parent_page_id())
        };

        let result = self.insert_into_parent(page_id, parent, separator, new_page_id);
        self.pool.unpin_page(new_page_id, true);
        result
    }

    /// Splits an overflowing internal node (size == max_size + 1).
    ///
    /// The right half's slot-0 key is promoted as the separator; that
    /// slot serves as the new page's dummy from here on.
    fn split_internal(&self, frame: &BufferFrame) -> Result<()> {
        let page_id = frame.page_id();
        let (new_frame, new_page_id) = self.pool.new_page()?;

        let split = {
            let mut left_guard = frame.write_data();
            let mut right_guard = new_frame.write_data();
            let mut left = InternalNode::<K>::attach(&mut left_guard);
            let mut right = InternalNode::<K>::init(
                &mut right_guard,
                new_page_id,
                PageId::INVALID,
                self.internal_max_size,
            );

            left.move_half_to(&mut right, &self.pool)
                .map(|()| (right.key_at(0), left.parent_page_id()))
        };

        let result = match split {
            Ok((separator, parent)) => {
                self.insert_into_parent(page_id, parent, separator, new_page_id)
            }
            Err(e) => Err(e),
        };
        self.pool.unpin_page(new_page_id, true);
        result
    }

    /// Posts a split to the parent of `old_page_id`: either grows a new
    /// root above the old one, or inserts the separator into the existing
    /// parent and recursively splits it on overflow.
    ///
    /// Both `old_page_id` and `new_page_id` are pinned by the caller.
    fn insert_into_parent(
        &self,
        old_page_id: PageId,
        parent: PageId,
        separator: K,
        new_page_id: PageId,
    ) -> Result<()> {
        if !parent.is_valid() {
            // The old node was the root: add a level above it.
            let (root_frame, root_page_id) = self.pool.new_page()?;
            {
                let mut guard = root_frame.write_data();
                let mut root = InternalNode::<K>::init(
                    &mut guard,
                    root_page_id,
                    PageId::INVALID,
                    self.internal_max_size,
                );
                root.populate_new_root(old_page_id, separator, new_page_id);
            }
            self.pool.unpin_page(root_page_id, true);

            self.set_parent_of(old_page_id, root_page_id)?;
            self.set_parent_of(new_page_id, root_page_id)?;
            self.set_root_page_id(root_page_id);
            return self.update_root_record();
        }

        let parent_frame = self.pool.fetch_page(parent)?;
        let inserted = {
            let mut guard = parent_frame.write_data();
            let mut node = InternalNode::<K>::attach(&mut guard);
            node.insert_node_after(old_page_id, separator, new_page_id)
                .map(|_| node.size() > node.max_size())
        };

        let result = match inserted {
            Some(overflowed) => {
                match self.set_parent_of(new_page_id, parent) {
                    Ok(()) if overflowed => self.split_internal(parent_frame),
                    other => other,
                }
            }
            None => Err(corrupted(format!(
                "page {old_page_id} is not a child of its parent {parent}"
            ))),
        };
        self.pool.unpin_page(parent, true);
        result
    }

    /// Rewrites the parent pointer of a (resident) page.
    fn set_parent_of(&self, page_id: PageId, parent: PageId) -> Result<()> {
        let frame = self.pool.fetch_page(page_id)?;
        {
            let mut guard = frame.write_data();
            node::set_parent_page_id(&mut guard, parent);
        }
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes `key` and its record. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let frame = self.find_leaf(key)?;
        let page_id = frame.page_id();

        let removed = {
            let mut guard = frame.write_data();
            let mut leaf = LeafNode::<K>::attach(&mut guard);
            if leaf.remove(key) {
                Some(leaf.size() < leaf.min_size())
            } else {
                None
            }
        };

        match removed {
            None => {
                self.pool.unpin_page(page_id, false);
                Ok(())
            }
            Some(underflowed) => {
                self.pool.unpin_page(page_id, true);
                if underflowed {
                    self.coalesce_or_redistribute(page_id)?;
                }
                Ok(())
            }
        }
    }

    /// Restores the minimum-occupancy invariant for an underflowing node
    /// by merging with or borrowing from a sibling under the same parent,
    /// cascading upward when the parent underflows in turn.
    fn coalesce_or_redistribute(&self, page_id: PageId) -> Result<()> {
        if page_id == self.root_page_id() {
            return self.adjust_root();
        }

        let frame = self.pool.fetch_page(page_id)?;
        let meta = {
            let guard = frame.read_data();
            node::node_type(&guard).map(|t| (t, node::parent_page_id(&guard)))
        };
        let (node_type, parent) = match meta {
            Some(meta) if meta.1.is_valid() => meta,
            _ => {
                self.pool.unpin_page(page_id, false);
                return Err(corrupted(format!("page {page_id} has no parent to rebalance through")));
            }
        };

        let parent_frame = match self.pool.fetch_page(parent) {
            Ok(parent_frame) => parent_frame,
            Err(e) => {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        };

        // Pick the right-hand neighbor unless this is the last child, in
        // which case the left one. Either way it shares the parent, so
        // the separator between the two is a key of that parent.
        let picked = {
            let mut guard = parent_frame.write_data();
            let parent_node = InternalNode::<K>::attach(&mut guard);
            parent_node.value_index(page_id).and_then(|index| {
                if parent_node.size() < 2 {
                    None
                } else if index == parent_node.size() - 1 {
                    Some((index, index - 1, parent_node.value_at(index - 1)))
                } else {
                    Some((index, index + 1, parent_node.value_at(index + 1)))
                }
            })
        };
        let (node_index, sibling_index, sibling) = match picked {
            Some(picked) => picked,
            None => {
                self.pool.unpin_page(page_id, false);
                self.pool.unpin_page(parent, false);
                return Err(corrupted(format!(
                    "page {page_id} has no sibling under parent {parent}"
                )));
            }
        };

        let sibling_frame = match self.pool.fetch_page(sibling) {
            Ok(sibling_frame) => sibling_frame,
            Err(e) => {
                self.pool.unpin_page(page_id, false);
                self.pool.unpin_page(parent, false);
                return Err(e);
            }
        };

        let outcome = match node_type {
            NodeType::Leaf => {
                self.rebalance_leaf(frame, sibling_frame, parent_frame, node_index, sibling_index)
            }
            NodeType::Internal => self.rebalance_internal(
                frame,
                sibling_frame,
                parent_frame,
                node_index,
                sibling_index,
            ),
        };

        self.pool.unpin_page(page_id, true);
        self.pool.unpin_page(sibling, true);
        self.pool.unpin_page(parent, true);

        let (deleted, parent_underflowed) = outcome?;
        if let Some(deleted) = deleted {
            self.pool.delete_page(deleted);
        }
        if parent_underflowed {
            self.coalesce_or_redistribute(parent)?;
        }
        Ok(())
    }

    /// Merges or rebalances an underflowing leaf with its sibling.
    ///
    /// Returns the page emptied by a merge (for deletion) and whether the
    /// parent underflowed.
    fn rebalance_leaf(
        &self,
        node_frame: &BufferFrame,
        sibling_frame: &BufferFrame,
        parent_frame: &BufferFrame,
        node_index: u32,
        sibling_index: u32,
    ) -> Result<(Option<PageId>, bool)> {
        let mut node_guard = node_frame.write_data();
        let mut sibling_guard = sibling_frame.write_data();
        let mut parent_guard = parent_frame.write_data();
        let mut node = LeafNode::<K>::attach(&mut node_guard);
        let mut sibling = LeafNode::<K>::attach(&mut sibling_guard);
        let mut parent = InternalNode::<K>::attach(&mut parent_guard);

        if sibling.size() + node.size() <= node.max_size() {
            // Merge the right page into the left one so the sibling chain
            // mends in a single step.
            let deleted = if sibling_index > node_index {
                sibling.move_all_to(&mut node);
                node.set_next_page_id(sibling.next_page_id());
                parent.remove(sibling_index);
                sibling.page_id()
            } else {
                node.move_all_to(&mut sibling);
                sibling.set_next_page_id(node.next_page_id());
                parent.remove(node_index);
                node.page_id()
            };
            let underflowed = parent.size() < parent.min_size();
            Ok((Some(deleted), underflowed))
        } else if sibling_index > node_index {
            sibling.move_first_to_end_of(&mut node);
            parent.set_key_at(sibling_index, &sibling.key_at(0));
            Ok((None, false))
        } else {
            sibling.move_last_to_front_of(&mut node);
            parent.set_key_at(node_index, &node.key_at(0));
            Ok((None, false))
        }
    }

    /// Merges or rebalances an underflowing internal node, rotating the
    /// parent separator through the boundary and reparenting any children
    /// that change pages.
    fn rebalance_internal(
        &self,
        node_frame: &BufferFrame,
        sibling_frame: &BufferFrame,
        parent_frame: &BufferFrame,
        node_index: u32,
        sibling_index: u32,
    ) -> Result<(Option<PageId>, bool)> {
        let mut node_guard = node_frame.write_data();
        let mut sibling_guard = sibling_frame.write_data();
        let mut parent_guard = parent_frame.write_data();
        let mut node = InternalNode::<K>::attach(&mut node_guard);
        let mut sibling = InternalNode::<K>::attach(&mut sibling_guard);
        let mut parent = InternalNode::<K>::attach(&mut parent_guard);

        // Strictly below max: the merged page absorbs the separator too.
        if sibling.size() + node.size() < node.max_size() {
            let deleted = if sibling_index > node_index {
                let middle_key = parent.key_at(sibling_index);
                sibling.move_all_to(&mut node, middle_key, &self.pool)?;
                parent.remove(sibling_index);
                sibling.page_id()
            } else {
                let middle_key = parent.key_at(node_index);
                node.move_all_to(&mut sibling, middle_key, &self.pool)?;
                parent.remove(node_index);
                node.page_id()
            };
            let underflowed = parent.size() < parent.min_size();
            Ok((Some(deleted), underflowed))
        } else if sibling_index > node_index {
            let middle_key = parent.key_at(sibling_index);
            sibling.move_first_to_end_of(&mut node, middle_key, &self.pool)?;
            parent.set_key_at(sibling_index, &sibling.key_at(0));
            Ok((None, false))
        } else {
            let middle_key = parent.key_at(node_index);
            sibling.move_last_to_front_of(&mut node, middle_key, &self.pool)?;
            parent.set_key_at(node_index, &node.key_at(0));
            Ok((None, false))
        }
    }

    /// Shrinks the tree at the top after a delete.
    ///
    /// An internal root left with a single child hands the root role to
    /// that child; a leaf root left empty is deleted, leaving the tree
    /// empty. Anything else is left alone (the root is exempt from the
    /// minimum-occupancy rule).
    fn adjust_root(&self) -> Result<()> {
        let root_page_id = self.root_page_id();
        let frame = self.pool.fetch_page(root_page_id)?;

        enum RootFate {
            Keep,
            Collapse(PageId),
            DeleteEmptyLeaf,
        }

        let fate = {
            let mut guard = frame.write_data();
            match node::node_type(&guard) {
                Some(NodeType::Internal) if node::node_size(&guard) == 1 => {
                    let mut root = InternalNode::<K>::attach(&mut guard);
                    RootFate::Collapse(root.remove_and_return_only_child())
                }
                Some(NodeType::Leaf) if node::node_size(&guard) == 0 => RootFate::DeleteEmptyLeaf,
                Some(_) => RootFate::Keep,
                None => {
                    drop(guard);
                    self.pool.unpin_page(root_page_id, false);
                    return Err(corrupted(format!("root page {root_page_id} is not a tree node")));
                }
            }
        };

        match fate {
            RootFate::Keep => {
                self.pool.unpin_page(root_page_id, false);
                Ok(())
            }
            RootFate::Collapse(child) => {
                self.pool.unpin_page(root_page_id, true);
                self.set_parent_of(child, PageId::INVALID)?;
                self.set_root_page_id(child);
                self.pool.delete_page(root_page_id);
                self.update_root_record()
            }
            RootFate::DeleteEmptyLeaf => {
                self.pool.unpin_page(root_page_id, true);
                self.pool.delete_page(root_page_id);
                self.set_root_page_id(PageId::INVALID);
                self.update_root_record()
            }
        }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Cursor positioned at the smallest key.
    pub fn iter(&self) -> Result<TreeIterator<K>> {
        if self.is_empty() {
            return Ok(TreeIterator::empty(self.pool.clone()));
        }
        let leaf = self.find_leftmost_leaf()?;
        TreeIterator::new(self.pool.clone(), leaf, 0)
    }

    /// Cursor positioned at the first entry with a key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>> {
        if self.is_empty() {
            return Ok(TreeIterator::empty(self.pool.clone()));
        }

        let frame = self.find_leaf(key)?;
        let page_id = frame.page_id();
        let index = {
            let mut guard = frame.write_data();
            let leaf = LeafNode::<K>::attach(&mut guard);
            leaf.lower_bound(key)
        };
        self.pool.unpin_page(page_id, false);

        TreeIterator::new(self.pool.clone(), page_id, index)
    }

    // =========================================================================
    // Consistency checking
    // =========================================================================

    /// Walks the whole tree and verifies its structural invariants:
    /// occupancy bounds, key ordering, separator/subtree agreement,
    /// parent pointers, and the leaf sibling chain.
    ///
    /// Intended for tests and offline checks; it reads every page.
    pub fn check_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let root = self.root_page_id();
        let mut leaves = Vec::new();
        self.check_subtree(root, PageId::INVALID, None, None, &mut leaves)?;

        for window in leaves.windows(2) {
            let (_, next) = window[0];
            let (following, _) = window[1];
            if next != following {
                return Err(corrupted(format!(
                    "leaf chain skips from {next} to {following}"
                )));
            }
        }
        if let Some(&(last, next)) = leaves.last() {
            if next.is_valid() {
                return Err(corrupted(format!(
                    "rightmost leaf {last} still points at {next}"
                )));
            }
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        leaves: &mut Vec<(PageId, PageId)>,
    ) -> Result<()> {
        let summary = self.read_node(page_id)?;
        let is_root = page_id == self.root_page_id();

        if summary.page_id != page_id {
            return Err(corrupted(format!(
                "page {page_id} records id {} in its header",
                summary.page_id
            )));
        }
        if summary.parent != expected_parent {
            return Err(corrupted(format!(
                "page {page_id} records parent {} but hangs under {expected_parent}",
                summary.parent
            )));
        }

        let size = summary.keys.len() as u32;
        let min_size = (summary.max_size + 1) / 2;
        if is_root {
            let min_root = match summary.children {
                Some(_) => 2,
                None => 1,
            };
            if size < min_root {
                return Err(corrupted(format!("root {page_id} holds {size} entries")));
            }
        } else if size < min_size || size > summary.max_size {
            return Err(corrupted(format!(
                "page {page_id} holds {size} entries outside [{min_size}, {}]",
                summary.max_size
            )));
        }

        // Internal slot 0 is a dummy; real keys start at index 1.
        let first_real_key = if summary.children.is_some() { 1 } else { 0 };
        let real_keys = &summary.keys[first_real_key..];
        for pair in real_keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(corrupted(format!("page {page_id} keys out of order")));
            }
        }
        for key in real_keys {
            if lower.is_some_and(|lo| *key < lo) || upper.is_some_and(|hi| *key >= hi) {
                return Err(corrupted(format!(
                    "page {page_id} holds a key outside its separator range"
                )));
            }
        }

        match summary.children {
            Some(children) => {
                for (i, &child) in children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(summary.keys[i]) };
                    let child_upper = if i + 1 == children.len() {
                        upper
                    } else {
                        Some(summary.keys[i + 1])
                    };
                    self.check_subtree(child, page_id, child_lower, child_upper, leaves)?;
                }
            }
            None => leaves.push((page_id, summary.next)),
        }
        Ok(())
    }

    /// Copies one node's header and keys out of the pool, holding its pin
    /// only for the duration of the copy.
    fn read_node(&self, page_id: PageId) -> Result<NodeSummary<K>> {
        let frame = self.pool.fetch_page(page_id)?;
        let summary = {
            let mut guard = frame.write_data();
            match node::node_type(&guard) {
                Some(NodeType::Leaf) => {
                    let leaf = LeafNode::<K>::attach(&mut guard);
                    Some(NodeSummary {
                        page_id: leaf.page_id(),
                        parent: leaf.parent_page_id(),
                        max_size: leaf.max_size(),
                        keys: (0..leaf.size()).map(|i| leaf.key_at(i)).collect(),
                        children: None,
                        next: leaf.next_page_id(),
                    })
                }
                Some(NodeType::Internal) => {
                    let internal = InternalNode::<K>::attach(&mut guard);
                    Some(NodeSummary {
                        page_id: internal.page_id(),
                        parent: internal.parent_page_id(),
                        max_size: internal.max_size(),
                        keys: (0..internal.size()).map(|i| internal.key_at(i)).collect(),
                        children: Some((0..internal.size()).map(|i| internal.value_at(i)).collect()),
                        next: PageId::INVALID,
                    })
                }
                None => None,
            }
        };
        self.pool.unpin_page(page_id, false);

        summary.ok_or_else(|| corrupted(format!("page {page_id} is not a tree node")))
    }
}

/// Snapshot of one node used by the integrity checker.
struct NodeSummary<K> {
    page_id: PageId,
    parent: PageId,
    max_size: u32,
    keys: Vec<K>,
    children: Option<Vec<PageId>>,
    next: PageId,
}

fn corrupted(message: String) -> VellumError {
    VellumError::TreeCorrupted(message)
}
