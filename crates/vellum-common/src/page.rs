//! Page identity and sizing for VellumDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB). The unit of disk I/O and buffer caching.
pub const PAGE_SIZE: usize = 4 * 1024;

/// In-memory buffer holding exactly one page.
pub type PageData = [u8; PAGE_SIZE];

/// Unique identifier for a page within the data file.
///
/// Ids are dense non-negative integers handed out by the disk manager.
/// Two values are reserved: `INVALID` marks absent references (null
/// sibling or parent pointers) and `HEADER` is the well-known registry
/// page at the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(-1);

    /// The header page holding the index registry.
    pub const HEADER: PageId = PageId(0);

    /// Returns true if this id refers to an actual page.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Encodes the id as 4 little-endian bytes.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Decodes an id from 4 little-endian bytes.
    pub fn from_le_bytes(buf: [u8; 4]) -> Self {
        PageId(i32::from_le_bytes(buf))
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4 * 1024);
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_reserved_values() {
        assert_eq!(PageId::INVALID, PageId(-1));
        assert_eq!(PageId::HEADER, PageId(0));

        assert!(!PageId::INVALID.is_valid());
        assert!(PageId::HEADER.is_valid());
        assert!(PageId(42).is_valid());
    }

    #[test]
    fn test_page_id_le_roundtrip() {
        for id in [PageId(-1), PageId(0), PageId(1), PageId(i32::MAX)] {
            assert_eq!(PageId::from_le_bytes(id.to_le_bytes()), id);
        }
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(5).to_string(), "5");
        assert_eq!(PageId::INVALID.to_string(), "-1");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::INVALID < PageId::HEADER);
        assert!(PageId(1) < PageId(2));
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1)); // Duplicate

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
