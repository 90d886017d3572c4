//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// Buffer pool manager.
///
/// Caches a fixed number of pages in memory frames:
/// - Page ID to frame ID mapping
/// - Free frame list for unused frames
/// - LRU replacement over unpinned frames
/// - Pin counting and dirty write-back on eviction
///
/// Bookkeeping is guarded by one pool-wide mutex held for the duration of
/// each call, including the disk I/O a miss or an eviction performs, so
/// concurrent misses serialize behind the I/O.
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    pool_size: usize,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Backing store for page reads, write-back, and id allocation.
    disk: Arc<DiskManager>,
    /// Page replacement policy over unpinned frames.
    replacer: LruReplacer,
    /// Page table and free list.
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    /// Page ID to frame ID mapping for resident pages.
    page_table: HashMap<PageId, FrameId>,
    /// List of unused frame IDs.
    free_list: Vec<FrameId>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool with `pool_size` frames.
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            pool_size,
            frames,
            disk,
            replacer: LruReplacer::new(pool_size),
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it
    /// for the buffer pool. Minimum 1,000 frames to ensure useful caching
    /// even on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let pool_size = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(pool_size, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the disk manager backing this pool.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Fetches a page, pinning it.
    ///
    /// On a hit the resident frame is pinned and returned. On a miss a
    /// frame is taken from the free list or evicted from the replacer
    /// (writing the victim back first when dirty), the page is read from
    /// disk, and the mapping installed. Fails with `BufferPoolFull` when
    /// every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.pin(frame_id);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        match self.disk.read_page(page_id) {
            Ok(data) => frame.copy_from(&data),
            Err(e) => {
                inner.free_list.push(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok(frame)
    }

    /// Allocates a fresh disk page and pins it in a zeroed frame.
    ///
    /// Returns the new frame together with its page id. Fails with
    /// `BufferPoolFull` when no free or evictable frame exists; in that
    /// case no disk page is allocated.
    pub fn new_page(&self) -> Result<(&BufferFrame, PageId)> {
        let mut inner = self.inner.lock();

        if inner.free_list.is_empty() && self.replacer.size() == 0 {
            return Err(VellumError::BufferPoolFull);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        let page_id = match self.disk.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                inner.free_list.push(frame_id);
                return Err(e);
            }
        };

        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok((frame, page_id))
    }

    /// Unpins a page, recording whether the caller modified it.
    ///
    /// The dirty bit only ever moves false -> true here; a clean unpin
    /// never clears a prior dirty mark. When the pin count reaches zero
    /// the frame becomes evictable. Returns false if the page is not
    /// resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.pin_count() == 0 {
                return false;
            }
            if is_dirty {
                frame.set_dirty(true);
            }
            if frame.unpin() == 0 {
                self.replacer.unpin(frame_id);
            }
            return true;
        }
        false
    }

    /// Drops a page from the pool and releases its disk id.
    ///
    /// Returns true when the page is gone from this layer (including the
    /// not-resident case) and false when it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };

        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return false;
        }

        self.replacer.pin(frame_id);
        self.disk.deallocate_page(page_id);
        inner.page_table.remove(&page_id);
        frame.reset();
        inner.free_list.push(frame_id);

        true
    }

    /// Writes a resident page back to disk, clearing its dirty bit.
    ///
    /// Returns true if the page was resident and written.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
            }
            frame.set_dirty(false);
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes every resident dirty page back to disk.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all_pages(&self) -> Result<usize> {
        let inner = self.inner.lock();
        let mut flushed = 0;

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                {
                    let data = frame.read_data();
                    self.disk.write_page(page_id, &data)?;
                }
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        let mut pin_count_total = 0;

        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
            pin_count_total += frame.pin_count() as usize;
        }

        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
            pin_count_total,
        }
    }

    /// Obtains a frame for a new resident page: free list first, then the
    /// replacer. The victim's contents are written back when dirty and
    /// its old mapping removed.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(VellumError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.0 as usize];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let data = frame.read_data();
            if let Err(e) = self.disk.write_page(old_page_id, &data) {
                drop(data);
                self.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Sum of pin counts over all resident frames.
    pub pin_count_total: usize,
}
