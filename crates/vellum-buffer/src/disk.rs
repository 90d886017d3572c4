//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use vellum_common::page::{PageData, PageId, PAGE_SIZE};
use vellum_common::{Result, StorageConfig, VellumError};

/// Name of the data file inside the configured data directory.
const DATA_FILE_NAME: &str = "vellum.db";

/// Manages reading and writing pages of the data file.
///
/// Page ids are dense: `allocate_page` reuses deallocated ids before
/// extending the file. The free set lives in memory only, so ids freed in
/// a previous process run stay unused until a vacuum rediscovers them;
/// that pass is outside this layer.
pub struct DiskManager {
    config: StorageConfig,
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The open data file.
    file: File,
    /// Number of pages in the file.
    num_pages: i32,
    /// Deallocated ids available for reuse, smallest first.
    free_pages: BTreeSet<i32>,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the data file.
    pub fn new(config: StorageConfig) -> Result<Self> {
        if config.page_size != PAGE_SIZE {
            return Err(VellumError::PageSizeMismatch {
                expected: PAGE_SIZE,
                actual: config.page_size,
            });
        }

        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(DATA_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as i32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_pages: BTreeSet::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<PageData> {
        let mut inner = self.inner.lock();

        if !page_id.is_valid() || page_id.0 >= inner.num_pages {
            return Err(VellumError::PageNotFound { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        inner.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &PageData) -> Result<()> {
        let mut inner = self.inner.lock();

        if !page_id.is_valid() {
            return Err(VellumError::PageNotFound { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Allocates a page id, reusing a freed id when one exists.
    ///
    /// Fresh ids extend the file with a zeroed page so a subsequent read
    /// of the new id succeeds.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.free_pages.iter().next() {
            inner.free_pages.remove(&id);
            return Ok(PageId(id));
        }

        let id = inner.num_pages;
        let offset = (id as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages = id + 1;

        Ok(PageId(id))
    }

    /// Releases a page id for reuse by a later `allocate_page`.
    pub fn deallocate_page(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if page_id.is_valid() && page_id.0 < inner.num_pages {
            inner.free_pages.insert(page_id.0);
        }
    }

    /// Returns the number of pages in the data file.
    pub fn num_pages(&self) -> i32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_rejects_wrong_page_size() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            page_size: 8192,
            ..Default::default()
        };
        let result = DiskManager::new(config);
        assert!(matches!(result, Err(VellumError::PageSizeMismatch { .. })));
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page1 = dm.allocate_page().unwrap();
        assert_eq!(page1, PageId(0));

        let page2 = dm.allocate_page().unwrap();
        assert_eq!(page2, PageId(1));

        assert_eq!(dm.num_pages(), 2);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_fresh_page_reads_zeroed() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page().unwrap();
        let data = dm.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_read_nonexistent_page() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page().unwrap();

        assert!(matches!(
            dm.read_page(PageId(99)),
            Err(VellumError::PageNotFound { page_id: 99 })
        ));
        assert!(dm.read_page(PageId::INVALID).is_err());
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page().unwrap();

        let mut data1 = [0u8; PAGE_SIZE];
        data1[0] = 0xAA;
        dm.write_page(page_id, &data1).unwrap();

        let mut data2 = [0u8; PAGE_SIZE];
        data2[0] = 0xBB;
        dm.write_page(page_id, &data2).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xBB);
    }

    #[test]
    fn test_disk_manager_deallocate_reuses_id() {
        let (dm, _dir) = create_test_disk_manager();

        let p0 = dm.allocate_page().unwrap();
        let p1 = dm.allocate_page().unwrap();
        let p2 = dm.allocate_page().unwrap();
        assert_eq!((p0, p1, p2), (PageId(0), PageId(1), PageId(2)));

        dm.deallocate_page(p1);
        dm.deallocate_page(p0);

        // Smallest freed id first, then the next one, then a fresh id.
        assert_eq!(dm.allocate_page().unwrap(), PageId(0));
        assert_eq!(dm.allocate_page().unwrap(), PageId(1));
        assert_eq!(dm.allocate_page().unwrap(), PageId(3));
    }

    #[test]
    fn test_disk_manager_deallocate_invalid_is_noop() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page().unwrap();
        dm.deallocate_page(PageId::INVALID);
        dm.deallocate_page(PageId(50));

        assert_eq!(dm.allocate_page().unwrap(), PageId(1));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let page_id;

        // Write data
        {
            let config = StorageConfig {
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let dm = DiskManager::new(config).unwrap();
            page_id = dm.allocate_page().unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        // Read with new disk manager
        {
            let config = StorageConfig {
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let dm = DiskManager::new(config).unwrap();

            assert_eq!(dm.num_pages(), 1);
            let read_data = dm.read_page(page_id).unwrap();
            assert_eq!(read_data[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page().unwrap();
        dm.flush().unwrap();
    }
}
