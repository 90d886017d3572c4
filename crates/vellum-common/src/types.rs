//! Key and record-identifier types stored in index pages.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// A fixed-width key storable inline in a tree page.
///
/// Keys are written little-endian at a fixed width and compared through
/// their decoded value, so signed integer keys order correctly without a
/// separate comparator object.
pub trait IndexKey: Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Writes the key into `buf[..Self::ENCODED_LEN]`.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a key from `buf[..Self::ENCODED_LEN]`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_index_key {
    ($($t:ty),* $(,)?) => {$(
        impl IndexKey for $t {
            const ENCODED_LEN: usize = std::mem::size_of::<$t>();

            fn encode(&self, buf: &mut [u8]) {
                buf[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
            }

            fn decode(buf: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&buf[..Self::ENCODED_LEN]);
                <$t>::from_le_bytes(raw)
            }
        }
    )*};
}

impl_index_key!(i32, i64, u32, u64);

/// Location of a record in the owning table: page plus slot.
///
/// This is the fixed-width payload stored next to each key in leaf pages.
/// The index never interprets it beyond copying it around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Page containing the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl RecordId {
    /// Encoded width in bytes (page id + slot, both little-endian).
    pub const ENCODED_LEN: usize = 8;

    /// Invalid record id.
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: u32::MAX,
    };

    /// Creates a new record id.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns true if this is a valid record id.
    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }

    /// Writes the record id into `buf[..Self::ENCODED_LEN]`.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Reads a record id from `buf[..Self::ENCODED_LEN]`.
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}
