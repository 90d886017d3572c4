//! Forward range iteration over the leaf sibling chain.

use crate::node::LeafNode;
use std::marker::PhantomData;
use std::sync::Arc;
use vellum_buffer::BufferPoolManager;
use vellum_common::page::PageId;
use vellum_common::{IndexKey, RecordId};

/// Cursor over the leaf chain of a B+ tree, in ascending key order.
///
/// The iterator keeps its current leaf pinned and releases the pin when
/// it hops to the next leaf, reaches the end, or is dropped. Entries are
/// yielded by value; they stay valid after the cursor moves on.
///
/// Like the tree itself, a live iterator must not overlap with tree
/// mutations; callers serialize access externally.
pub struct TreeIterator<K: IndexKey> {
    pool: Arc<BufferPoolManager>,
    leaf: PageId,
    index: u32,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    /// Creates a cursor positioned at `index` of `leaf`, pinning it.
    ///
    /// A position past the leaf's last entry is normalized forward to the
    /// next leaf, or to the end state on the rightmost leaf.
    pub(crate) fn new(
        pool: Arc<BufferPoolManager>,
        leaf: PageId,
        index: u32,
    ) -> vellum_common::Result<Self> {
        let mut iter = Self {
            pool,
            leaf,
            index,
            _marker: PhantomData,
        };
        if iter.leaf.is_valid() {
            iter.pool.fetch_page(iter.leaf)?;
            iter.skip_exhausted()?;
        }
        Ok(iter)
    }

    /// Creates an already exhausted cursor (empty tree).
    pub(crate) fn empty(pool: Arc<BufferPoolManager>) -> Self {
        Self {
            pool,
            leaf: PageId::INVALID,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// True once the cursor has passed the last entry of the rightmost
    /// leaf.
    pub fn is_end(&self) -> bool {
        !self.leaf.is_valid()
    }

    /// While the cursor sits past the current leaf's last entry, follow
    /// the sibling chain. Expects the current leaf (if any) pinned;
    /// leaves the new current leaf pinned, or none at the end.
    fn skip_exhausted(&mut self) -> vellum_common::Result<()> {
        while self.leaf.is_valid() {
            let frame = self.pool.fetch_page(self.leaf)?;
            let (size, next) = {
                let mut guard = frame.write_data();
                let leaf = LeafNode::<K>::attach(&mut guard);
                (leaf.size(), leaf.next_page_id())
            };
            self.pool.unpin_page(self.leaf, false);

            if self.index < size {
                return Ok(());
            }

            // Release the standing pin and hop to the sibling.
            self.pool.unpin_page(self.leaf, false);
            self.leaf = next;
            self.index = 0;
            if next.is_valid() {
                self.pool.fetch_page(next)?;
            }
        }
        Ok(())
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.leaf.is_valid() {
            return None;
        }

        let frame = match self.pool.fetch_page(self.leaf) {
            Ok(frame) => frame,
            Err(_) => {
                self.pool.unpin_page(self.leaf, false);
                self.leaf = PageId::INVALID;
                return None;
            }
        };
        let item = {
            let mut guard = frame.write_data();
            let leaf = LeafNode::<K>::attach(&mut guard);
            leaf.item(self.index)
        };
        self.pool.unpin_page(self.leaf, false);

        self.index += 1;
        if self.skip_exhausted().is_err() {
            self.leaf = PageId::INVALID;
        }
        Some(item)
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        if self.leaf.is_valid() {
            self.pool.unpin_page(self.leaf, false);
        }
    }
}
