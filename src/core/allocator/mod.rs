//! Block allocation for the local blob store
//!
//! The device is partitioned into `block_count` equally sized blocks. An
//! allocator hands these out as reference-counted [`Block`] handles; once the
//! last reference to a block is gone its region returns to the free list and
//! may be handed out again.
//!
//! - [`device_backed`] - allocator over a single [`BlockDevice`]
//! - [`block`] - block handles, readers and one-shot put writers
//!
//! [`BlockDevice`]: crate::core::device::BlockDevice

pub mod block;
pub mod device_backed;

pub use block::{Block, BlockPutWriter, BlockReader};
pub use device_backed::BlockDeviceBackedAllocator;

use crate::core::error::Result;
use crate::core::location::BlockLocation;

/// Block allocator trait
///
/// Consumed by the generational block list, which decides when blocks are
/// created and when they are dropped.
pub trait BlockAllocator: Send + Sync {
    /// Allocate an unused block with an empty write cursor.
    ///
    /// Fails with [`OutOfBlocks`] when every block is in use. That condition
    /// is transient: blocks become available as other holders release them.
    ///
    /// [`OutOfBlocks`]: crate::core::error::BlockStoreError::OutOfBlocks
    fn new_block(&self) -> Result<(Block, BlockLocation)>;

    /// Re-attach to a block that was in use before a restart.
    ///
    /// The write cursor resumes at `write_offset_bytes` rounded up to a whole
    /// sector. Fails with [`LocationNotFound`] if `location` does not name an
    /// unused block; callers must treat that as a fatal inconsistency.
    ///
    /// [`LocationNotFound`]: crate::core::error::BlockStoreError::LocationNotFound
    fn new_block_at_location(&self, location: &BlockLocation, write_offset_bytes: u64)
        -> Result<Block>;
}

/// Number of sectors needed to hold `size_bytes`
///
/// Partial sectors always consume a whole sector.
pub(crate) fn sectors_for(size_bytes: u64, sector_size_bytes: usize) -> u64 {
    size_bytes.div_ceil(sector_size_bytes as u64)
}
