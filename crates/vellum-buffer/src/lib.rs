//! Buffer management for VellumDB.
//!
//! This crate provides page caching over the disk manager:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction over unpinned frames
//! - Pin counting for shared access
//! - Dirty page tracking with write-back on eviction

mod disk;
mod frame;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPoolManager, BufferPoolStats};
pub use replacer::{LruReplacer, Replacer};
