//! Allocator backed by a single block device
//!
//! The device is partitioned into `block_count` equally sized blocks stored
//! back to back. Blocks are initially handed out by increasing offset; after
//! that the least recently released block is reused first, which spreads
//! writes evenly across the device (wear leveling).
//!
//! All writes go through a [`SectorWriter`], so they happen at sector
//! boundaries and sizes and never trigger a read of the underlying storage.
//!
//! [`SectorWriter`]: crate::core::sector_writer::SectorWriter

use crate::core::allocator::{sectors_for, Block, BlockAllocator};
use crate::core::buffer::ReadBufferFactory;
use crate::core::config::AllocatorConfig;
use crate::core::device::BlockDevice;
use crate::core::error::{BlockStoreError, Result};
use crate::core::location::BlockLocation;
use crate::core::metrics::AllocatorMetrics;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// State shared between the allocator and every block it has issued
pub(crate) struct AllocatorShared {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) buffer_factory: Arc<dyn ReadBufferFactory>,
    pub(crate) metrics: Arc<AllocatorMetrics>,
    pub(crate) sector_size_bytes: usize,
    pub(crate) block_sector_count: u64,
    block_count: usize,
    /// Sector offsets of unused blocks, least recently released first
    free_offsets: Mutex<VecDeque<u64>>,
}

impl AllocatorShared {
    pub(crate) fn location(&self, offset_sectors: u64) -> BlockLocation {
        let sector_size = self.sector_size_bytes as u64;
        BlockLocation::new(offset_sectors * sector_size, self.block_sector_count * sector_size)
    }

    /// Called when the last reference to a block is dropped.
    pub(crate) fn return_offset(&self, offset_sectors: u64) {
        self.free_offsets.lock().push_back(offset_sectors);
        self.metrics.record_release();
        trace!("Released block at sector {}", offset_sectors);
    }

    fn new_block_object(
        self: &Arc<Self>,
        offset_sectors: u64,
        write_offset_sectors: u64,
    ) -> Block {
        self.metrics.record_allocation();
        Block::new(Arc::clone(self), offset_sectors, write_offset_sectors)
    }
}

/// Block allocator over one [`BlockDevice`]
///
/// Cloning yields another handle to the same allocator.
#[derive(Clone)]
pub struct BlockDeviceBackedAllocator {
    shared: Arc<AllocatorShared>,
}

impl BlockDeviceBackedAllocator {
    /// Create an allocator with its own metrics.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the geometry is invalid or the device is
    /// smaller than `block_count` blocks.
    pub fn new(
        device: Arc<dyn BlockDevice>,
        buffer_factory: Arc<dyn ReadBufferFactory>,
        config: &AllocatorConfig,
    ) -> Result<Self> {
        Self::with_metrics(device, buffer_factory, config, Arc::new(AllocatorMetrics::new()))
    }

    /// Create an allocator reporting into `metrics`.
    pub fn with_metrics(
        device: Arc<dyn BlockDevice>,
        buffer_factory: Arc<dyn ReadBufferFactory>,
        config: &AllocatorConfig,
        metrics: Arc<AllocatorMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let required = config.device_size_bytes()?;
        if device.size_bytes() < required {
            return Err(BlockStoreError::InvalidConfig(format!(
                "device holds {} bytes, but {} blocks of {} bytes need {}",
                device.size_bytes(),
                config.block_count,
                config.block_size_bytes()?,
                required
            )));
        }

        let free_offsets = (0..config.block_count as u64)
            .map(|i| i * config.block_sector_count)
            .collect();

        info!(
            "Block allocator: {} blocks of {} sectors ({} bytes/sector)",
            config.block_count, config.block_sector_count, config.sector_size_bytes
        );

        Ok(BlockDeviceBackedAllocator {
            shared: Arc::new(AllocatorShared {
                device,
                buffer_factory,
                metrics,
                sector_size_bytes: config.sector_size_bytes,
                block_sector_count: config.block_sector_count,
                block_count: config.block_count,
                free_offsets: Mutex::new(free_offsets),
            }),
        })
    }

    pub fn block_count(&self) -> usize {
        self.shared.block_count
    }

    pub fn free_block_count(&self) -> usize {
        self.shared.free_offsets.lock().len()
    }

    /// Snapshot of the free list, next to be allocated first
    pub fn free_offsets(&self) -> Vec<u64> {
        self.shared.free_offsets.lock().iter().copied().collect()
    }

    pub fn sector_size_bytes(&self) -> usize {
        self.shared.sector_size_bytes
    }

    pub fn block_sector_count(&self) -> u64 {
        self.shared.block_sector_count
    }

    pub fn block_size_bytes(&self) -> u64 {
        self.shared.block_sector_count * self.shared.sector_size_bytes as u64
    }

    pub fn metrics(&self) -> &Arc<AllocatorMetrics> {
        &self.shared.metrics
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.shared.device
    }
}

impl BlockAllocator for BlockDeviceBackedAllocator {
    fn new_block(&self) -> Result<(Block, BlockLocation)> {
        let offset_sectors = self.shared.free_offsets.lock().pop_front();
        let Some(offset_sectors) = offset_sectors else {
            warn!("No unused blocks available ({} total)", self.shared.block_count);
            return Err(BlockStoreError::OutOfBlocks);
        };

        debug!("Allocated block at sector {}", offset_sectors);
        Ok((
            self.shared.new_block_object(offset_sectors, 0),
            self.shared.location(offset_sectors),
        ))
    }

    fn new_block_at_location(
        &self,
        location: &BlockLocation,
        write_offset_bytes: u64,
    ) -> Result<Block> {
        let shared = &self.shared;
        let write_offset_sectors = sectors_for(write_offset_bytes, shared.sector_size_bytes);
        if write_offset_sectors > shared.block_sector_count {
            return Err(BlockStoreError::InvalidConfig(format!(
                "write offset {} exceeds size of block at {}",
                write_offset_bytes, location
            )));
        }

        let mut free_offsets = shared.free_offsets.lock();
        let index = free_offsets
            .iter()
            .position(|&offset| shared.location(offset) == *location);
        let Some(index) = index else {
            drop(free_offsets);
            warn!("Block location {} is not an unused block", location);
            return Err(BlockStoreError::LocationNotFound {
                offset_bytes: location.offset_bytes,
                size_bytes: location.size_bytes,
            });
        };

        // Startup only: swapping with the last entry keeps this O(1) at the
        // cost of strict FIFO order.
        let offset_sectors = free_offsets
            .swap_remove_back(index)
            .ok_or(BlockStoreError::LocationNotFound {
                offset_bytes: location.offset_bytes,
                size_bytes: location.size_bytes,
            })?;
        drop(free_offsets);

        debug!(
            "Re-attached block at sector {} with write offset {} sectors",
            offset_sectors, write_offset_sectors
        );
        Ok(shared.new_block_object(offset_sectors, write_offset_sectors))
    }
}

impl fmt::Debug for BlockDeviceBackedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDeviceBackedAllocator")
            .field("block_count", &self.shared.block_count)
            .field("block_sector_count", &self.shared.block_sector_count)
            .field("sector_size_bytes", &self.shared.sector_size_bytes)
            .field("free_blocks", &self.free_block_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::{Digest, ValidatingBufferFactory};
    use crate::core::device::MemoryBlockDevice;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECTOR: usize = 16;
    const BLOCK_SECTORS: u64 = 4;
    const BLOCKS: usize = 3;

    fn config() -> AllocatorConfig {
        AllocatorConfig {
            sector_size_bytes: SECTOR,
            block_sector_count: BLOCK_SECTORS,
            block_count: BLOCKS,
        }
    }

    fn allocator() -> (Arc<MemoryBlockDevice>, BlockDeviceBackedAllocator) {
        let device = Arc::new(MemoryBlockDevice::new(SECTOR * BLOCK_SECTORS as usize * BLOCKS));
        let alloc = BlockDeviceBackedAllocator::new(
            device.clone(),
            Arc::new(ValidatingBufferFactory),
            &config(),
        )
        .unwrap();
        (device, alloc)
    }

    fn noop() -> crate::core::buffer::DataIntegrityCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_initial_offsets_ascending() {
        let (_, alloc) = allocator();
        assert_eq!(alloc.free_offsets(), vec![0, 4, 8]);
        assert_eq!(alloc.block_size_bytes(), 64);
    }

    #[test]
    fn test_rejects_small_device() {
        let device = Arc::new(MemoryBlockDevice::new(100));
        let result =
            BlockDeviceBackedAllocator::new(device, Arc::new(ValidatingBufferFactory), &config());
        assert!(matches!(result, Err(BlockStoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_block_location() {
        let (_, alloc) = allocator();
        let (_a, loc_a) = alloc.new_block().unwrap();
        let (_b, loc_b) = alloc.new_block().unwrap();
        assert_eq!(loc_a, BlockLocation::new(0, 64));
        assert_eq!(loc_b, BlockLocation::new(64, 64));
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let (_, alloc) = allocator();
        let blocks: Vec<_> = (0..BLOCKS).map(|_| alloc.new_block().unwrap().0).collect();
        assert!(matches!(alloc.new_block(), Err(BlockStoreError::OutOfBlocks)));

        drop(blocks);
        assert_eq!(alloc.free_block_count(), BLOCKS);
        assert!(alloc.new_block().is_ok());
    }

    #[test]
    fn test_fifo_reuse() {
        let (_, alloc) = allocator();
        let (a, _) = alloc.new_block().unwrap();
        let (b, _) = alloc.new_block().unwrap();
        let (c, _) = alloc.new_block().unwrap();
        let (a_off, b_off) = (a.offset_sectors(), b.offset_sectors());

        a.release();
        b.release();
        let (first, _) = alloc.new_block().unwrap();
        let (second, _) = alloc.new_block().unwrap();
        assert_eq!(first.offset_sectors(), a_off);
        assert_eq!(second.offset_sectors(), b_off);
        drop(c);
    }

    #[test]
    fn test_put_get_round_trip() {
        let (device, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();

        let data = b"Hello, sectors!!!!"; // 18 bytes, 2 sectors
        let writer = block.put(data.len() as u64);
        assert_eq!(block.write_offset_sectors(), 2);
        assert_eq!(writer.write(&data[..]).unwrap(), 0);

        let valid = Arc::new(AtomicUsize::new(0));
        let seen = valid.clone();
        let buffer = block.get(
            Digest::compute(data),
            0,
            data.len() as u64,
            Box::new(move |ok| {
                if ok {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        assert_eq!(buffer.into_bytes().unwrap(), data);
        assert_eq!(valid.load(Ordering::SeqCst), 1);

        // Second sector is zero padded
        let raw = device.contents(16, 16);
        assert_eq!(&raw[..2], b"!!");
        assert!(raw[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_put_offsets_do_not_overlap() {
        let (_, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();

        let first = block.put(5);
        let second = block.put(20);
        let third = block.put(0);
        assert_eq!(first.offset_bytes(), 0);
        assert_eq!(second.offset_bytes(), 16);
        assert_eq!(third.offset_bytes(), 48);
        assert_eq!(block.reference_count(), 4);

        // Writers may complete out of order
        assert_eq!(second.write(&[2u8; 20][..]).unwrap(), 16);
        assert_eq!(first.write(&[1u8; 5][..]).unwrap(), 0);
        assert_eq!(third.write(&[0u8; 0][..]).unwrap(), 48);
        assert_eq!(block.reference_count(), 1);

        let data = block.get(Digest::compute(&[2u8; 20]), 16, 20, noop());
        assert_eq!(data.into_bytes().unwrap(), vec![2u8; 20]);
    }

    #[test]
    fn test_has_space() {
        let (_, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();

        assert!(block.has_space(64));
        assert!(!block.has_space(65));
        let _ = block.put(17); // 2 sectors
        assert!(block.has_space(32));
        assert!(block.has_space(17));
        assert!(!block.has_space(33));
        assert!(block.has_space(0));
    }

    #[test]
    fn test_reference_count_symmetry() {
        let (_, alloc) = allocator();
        let (block, _) = alloc.new_block().unwrap();
        assert_eq!(block.reference_count(), 1);

        let reader = block.reader(0, 8);
        assert_eq!(block.reference_count(), 2);
        reader.close();
        assert_eq!(block.reference_count(), 1);

        let stats = alloc.metrics().snapshot();
        assert_eq!(stats.reads_started, 1);
        assert_eq!(stats.reads_completed, 1);
    }

    #[test]
    fn test_reader_keeps_block_alive() {
        let (_, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();
        block.put(4).write(&b"data"[..]).unwrap();

        let buffer = block.get(Digest::compute(b"data"), 0, 4, noop());
        block.release();
        assert_eq!(alloc.free_block_count(), BLOCKS - 1);

        assert_eq!(buffer.into_bytes().unwrap(), b"data");
        assert_eq!(alloc.free_block_count(), BLOCKS);
        assert_eq!(alloc.metrics().snapshot().releases, 1);
    }

    #[test]
    fn test_writer_releases_on_io_error() {
        let (device, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();

        device.set_fail_writes(true);
        let writer = block.put(16);
        assert_eq!(block.reference_count(), 2);
        let result = writer.write(&[0u8; 16][..]);
        assert!(matches!(result, Err(BlockStoreError::Io(_))));
        assert_eq!(block.reference_count(), 1);
        // The reservation is not rolled back
        assert_eq!(block.write_offset_sectors(), 1);
    }

    #[test]
    fn test_writer_reports_short_and_long_sources() {
        let (device, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();

        let short = block.put(20).write(&[7u8; 10][..]);
        assert!(matches!(
            short,
            Err(BlockStoreError::SizeMismatch {
                expected: 20,
                actual: 10
            })
        ));
        // Received bytes were written and padded
        let raw = device.contents(0, 16);
        assert_eq!(&raw[..10], &[7u8; 10]);
        assert!(raw[10..].iter().all(|&b| b == 0));

        let long = block.put(4).write(&[1u8; 8][..]);
        assert!(matches!(long, Err(BlockStoreError::SourceTooLong { expected: 4 })));
        assert_eq!(block.reference_count(), 1);
    }

    #[test]
    fn test_short_source_zero_fills_reservation() {
        let device = Arc::new(MemoryBlockDevice::filled(
            SECTOR * BLOCK_SECTORS as usize * BLOCKS,
            0xAA,
        ));
        let alloc = BlockDeviceBackedAllocator::new(
            device.clone(),
            Arc::new(ValidatingBufferFactory),
            &config(),
        )
        .unwrap();
        let (mut block, _) = alloc.new_block().unwrap();

        let result = block.put(40).write(&[7u8; 10][..]);
        assert!(matches!(
            result,
            Err(BlockStoreError::SizeMismatch {
                expected: 40,
                actual: 10
            })
        ));

        // All three reserved sectors were written; nothing stale remains
        let raw = device.contents(0, 48);
        assert_eq!(&raw[..10], &[7u8; 10]);
        assert!(raw[10..].iter().all(|&b| b == 0));
        // The next sector is outside the reservation
        assert!(device.contents(48, 16).iter().all(|&b| b == 0xAA));
        assert_eq!(block.reference_count(), 1);
    }

    #[test]
    fn test_short_buffer_zero_fills_reservation() {
        let device = Arc::new(MemoryBlockDevice::filled(
            SECTOR * BLOCK_SECTORS as usize * BLOCKS,
            0xAA,
        ));
        let alloc = BlockDeviceBackedAllocator::new(
            device.clone(),
            Arc::new(ValidatingBufferFactory),
            &config(),
        )
        .unwrap();
        let (mut source, _) = alloc.new_block().unwrap();
        let (mut target, target_location) = alloc.new_block().unwrap();
        source.put(20).write(&[3u8; 20][..]).unwrap();

        // The digest declares another size, so the buffer yields nothing
        let digest = Digest::new(*Digest::compute(&[3u8; 20]).hash(), 21);
        let buffer = source.get(digest, 0, 20, noop());
        let result = target.put(20).write_buffer(buffer);
        assert!(matches!(result, Err(BlockStoreError::SizeMismatch { .. })));

        let raw = device.contents(target_location.offset_bytes, 32);
        assert!(raw.iter().all(|&b| b == 0));
        let next = device.contents(target_location.offset_bytes + 32, 16);
        assert!(next.iter().all(|&b| b == 0xAA));
        assert_eq!(target.reference_count(), 1);
    }

    #[test]
    fn test_offset_of_failed_write_read_beforehand() {
        let (device, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();
        block.put(16).write(&[1u8; 16][..]).unwrap();

        let writer = block.put(20);
        let offset = writer.offset_bytes();
        assert_eq!(offset, 16);
        assert!(writer.write(&[2u8; 5][..]).is_err());

        // The received bytes landed at the reserved offset
        assert_eq!(device.contents(offset, 5), vec![2u8; 5]);
        assert!(device.contents(offset + 5, 27).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unused_writer_releases_reference() {
        let (_, alloc) = allocator();
        let (mut block, _) = alloc.new_block().unwrap();
        let writer = block.put(8);
        drop(writer);
        assert_eq!(block.reference_count(), 1);
        assert_eq!(block.write_offset_sectors(), 1);
    }

    #[test]
    fn test_new_block_at_location() {
        let (_, alloc) = allocator();
        let location = BlockLocation::new(64, 64);

        let block = alloc.new_block_at_location(&location, 20).unwrap();
        assert_eq!(block.offset_sectors(), 4);
        assert_eq!(block.write_offset_sectors(), 2);
        assert_eq!(block.location(), location);
        // Swap-with-last removal
        assert_eq!(alloc.free_offsets(), vec![0, 8]);

        let again = alloc.new_block_at_location(&location, 0);
        assert!(matches!(again, Err(BlockStoreError::LocationNotFound { .. })));
    }

    #[test]
    fn test_new_block_at_location_swaps_with_last() {
        let (_, alloc) = allocator();
        let block = alloc
            .new_block_at_location(&BlockLocation::new(0, 64), 0)
            .unwrap();
        assert_eq!(alloc.free_offsets(), vec![8, 4]);
        drop(block);
        assert_eq!(alloc.free_offsets(), vec![8, 4, 0]);
    }

    #[test]
    fn test_new_block_at_location_rejects_mismatched_size() {
        let (_, alloc) = allocator();
        let result = alloc.new_block_at_location(&BlockLocation::new(0, 128), 0);
        assert!(matches!(result, Err(BlockStoreError::LocationNotFound { .. })));
        assert_eq!(alloc.free_block_count(), BLOCKS);
    }

    #[test]
    fn test_new_block_at_location_rejects_oversized_write_offset() {
        let (_, alloc) = allocator();
        let result = alloc.new_block_at_location(&BlockLocation::new(0, 64), 65);
        assert!(matches!(result, Err(BlockStoreError::InvalidConfig(_))));
        assert_eq!(alloc.free_block_count(), BLOCKS);
    }
}
