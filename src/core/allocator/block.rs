//! Reference-counted block handles
//!
//! Every live reference to a block is a [`BlockRef`], owned by exactly one of
//! three handle types:
//!
//! - [`Block`] - the allocator's original reference, held by the block list
//! - [`BlockReader`] - one per `Block::get`, dropped when the read completes
//! - [`BlockPutWriter`] - one per `Block::put`, dropped once the data is written
//!
//! References are given up in `Drop`, so each one is released exactly once on
//! every exit path. When the last one goes the block's region is returned to
//! the allocator's free list.

use crate::core::allocator::device_backed::AllocatorShared;
use crate::core::allocator::sectors_for;
use crate::core::buffer::{DataIntegrityCallback, Digest, ReadBuffer};
use crate::core::error::{BlockStoreError, Result};
use crate::core::location::BlockLocation;
use crate::core::sector_writer::SectorWriter;
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

struct BlockState {
    allocator: Arc<AllocatorShared>,
    offset_sectors: u64,
    reference_count: AtomicI64,
}

/// One counted reference to a block
struct BlockRef {
    state: Arc<BlockState>,
}

impl BlockRef {
    /// Take an additional reference. Only valid while `self` is alive, so
    /// the count observed afterwards is always at least two.
    fn acquire(&self, operation: &str) -> BlockRef {
        let count = self.state.reference_count.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            count > 1,
            "{}(): block at sector {} has invalid reference count {}",
            operation,
            self.state.offset_sectors,
            count
        );
        BlockRef {
            state: Arc::clone(&self.state),
        }
    }

    fn allocator(&self) -> &Arc<AllocatorShared> {
        &self.state.allocator
    }

    fn offset_sectors(&self) -> u64 {
        self.state.offset_sectors
    }

    fn device_offset_bytes(&self) -> u64 {
        self.state.offset_sectors * self.state.allocator.sector_size_bytes as u64
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        let count = self.state.reference_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(
            count >= 0,
            "release(): block at sector {} has invalid reference count {}",
            self.state.offset_sectors,
            count
        );
        if count == 0 {
            // No remaining consumers; the region may be reused for new data.
            self.state.allocator.return_offset(self.state.offset_sectors);
        }
    }
}

/// Handle to one allocated block
///
/// Dropping the handle (or calling [`Block::release`]) gives up the
/// allocator's reference. The region stays allocated until outstanding
/// readers and writers have finished as well.
pub struct Block {
    reference: BlockRef,
    /// Append cursor, advanced only through `&mut self`
    write_offset_sectors: u64,
}

impl Block {
    pub(crate) fn new(
        allocator: Arc<AllocatorShared>,
        offset_sectors: u64,
        write_offset_sectors: u64,
    ) -> Self {
        Block {
            reference: BlockRef {
                state: Arc::new(BlockState {
                    allocator,
                    offset_sectors,
                    reference_count: AtomicI64::new(1),
                }),
            },
            write_offset_sectors,
        }
    }

    /// Persistable descriptor of this block's region
    pub fn location(&self) -> BlockLocation {
        self.reference.allocator().location(self.reference.offset_sectors())
    }

    /// Sector offset of the block on the device
    pub fn offset_sectors(&self) -> u64 {
        self.reference.offset_sectors()
    }

    /// Sectors reserved so far, relative to the start of the block
    pub fn write_offset_sectors(&self) -> u64 {
        self.write_offset_sectors
    }

    pub fn write_offset_bytes(&self) -> u64 {
        self.write_offset_sectors * self.reference.allocator().sector_size_bytes as u64
    }

    /// Number of live references (this handle, readers and pending writers)
    pub fn reference_count(&self) -> i64 {
        self.reference.state.reference_count.load(Ordering::Acquire)
    }

    /// Give up this handle's reference.
    pub fn release(self) {
        drop(self);
    }

    /// Whether an object of `size_bytes` still fits behind the cursor
    pub fn has_space(&self, size_bytes: u64) -> bool {
        let allocator = self.reference.allocator();
        let needed = sectors_for(size_bytes, allocator.sector_size_bytes);
        self.write_offset_sectors
            .checked_add(needed)
            .is_some_and(|end| end <= allocator.block_sector_count)
    }

    /// Open a raw reader over `size_bytes` at `offset_bytes` into the block.
    ///
    /// The reader holds its own reference, so it stays valid even if this
    /// handle is released first.
    pub fn reader(&self, offset_bytes: u64, size_bytes: u64) -> BlockReader {
        let allocator = self.reference.allocator();
        debug_assert!(
            offset_bytes.saturating_add(size_bytes)
                <= allocator.block_sector_count * allocator.sector_size_bytes as u64,
            "read of {} bytes at offset {} exceeds block size",
            size_bytes,
            offset_bytes
        );

        let reference = self.reference.acquire("get");
        reference.allocator().metrics.record_read_started();
        BlockReader {
            start_bytes: reference.device_offset_bytes() + offset_bytes,
            size_bytes,
            position: 0,
            reference,
        }
    }

    /// Read an object back from the block.
    ///
    /// The range is wrapped by the allocator's buffer factory together with
    /// `digest` and `callback`, which validate the data as it is consumed.
    pub fn get(
        &self,
        digest: Digest,
        offset_bytes: u64,
        size_bytes: u64,
        callback: DataIntegrityCallback,
    ) -> Box<dyn ReadBuffer> {
        let factory = Arc::clone(&self.reference.allocator().buffer_factory);
        let reader = self.reader(offset_bytes, size_bytes);
        factory.new_buffer_from_reader_at(digest, reader, size_bytes, callback)
    }

    /// Reserve space for an object of `size_bytes`.
    ///
    /// The cursor advances immediately, so further puts can be issued before
    /// this one's data is available. Callers must check [`Block::has_space`]
    /// first; reserving past the end of the block is a contract violation.
    pub fn put(&mut self, size_bytes: u64) -> BlockPutWriter {
        let reference = self.reference.acquire("put");
        let sectors = sectors_for(size_bytes, reference.allocator().sector_size_bytes);
        debug_assert!(
            self.write_offset_sectors + sectors <= reference.allocator().block_sector_count,
            "put of {} bytes overflows block at sector {}",
            size_bytes,
            reference.offset_sectors()
        );

        let write_offset_sectors = self.write_offset_sectors;
        self.write_offset_sectors += sectors;

        BlockPutWriter {
            reference,
            write_offset_sectors,
            size_bytes,
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("offset_sectors", &self.offset_sectors())
            .field("write_offset_sectors", &self.write_offset_sectors)
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

/// Reader over a byte range of a block
///
/// Holds one reference to the block, released when the reader is dropped.
pub struct BlockReader {
    reference: BlockRef,
    /// Absolute device offset of the first byte
    start_bytes: u64,
    size_bytes: u64,
    position: u64,
}

impl BlockReader {
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Positional read relative to the start of the range
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size_bytes {
            return Ok(0);
        }
        let n = buf.len().min((self.size_bytes - offset) as usize);
        self.reference
            .allocator()
            .device
            .read_at(&mut buf[..n], self.start_bytes + offset)
    }

    /// Finish the read, releasing the block reference.
    pub fn close(self) {
        drop(self);
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Drop for BlockReader {
    fn drop(&mut self) {
        self.reference.allocator().metrics.record_read_completed();
    }
}

/// One-shot writer for space reserved by [`Block::put`]
///
/// Consuming the writer performs the write and releases its block reference,
/// whether or not the write succeeded. Dropping it unused releases the
/// reference too, without touching the device; the reserved sectors stay
/// consumed either way.
#[must_use = "reserved space is wasted unless the writer is used"]
pub struct BlockPutWriter {
    reference: BlockRef,
    /// Reserved offset, relative to the start of the block
    write_offset_sectors: u64,
    size_bytes: u64,
}

impl BlockPutWriter {
    /// Byte offset within the block where the object will be stored
    pub fn offset_bytes(&self) -> u64 {
        self.write_offset_sectors * self.reference.allocator().sector_size_bytes as u64
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Copy exactly the declared number of bytes from `source` into the
    /// reserved sectors, returning the byte offset within the block.
    ///
    /// A source that ends early or yields more than declared is reported as
    /// an error after whatever was received has been written. The rest of
    /// the reservation is zero-filled, so no stale device contents remain in
    /// it. The offset is only returned on success; callers that need it on
    /// the error path read [`BlockPutWriter::offset_bytes`] first.
    pub fn write<R: Read>(self, source: R) -> Result<u64> {
        let offset_bytes = self.offset_bytes();
        let result = self.copy_from_reader(source);
        self.finish(result.map(|()| offset_bytes))
    }

    /// Write a buffer read from another block (or any other [`ReadBuffer`]).
    pub fn write_buffer(self, buffer: Box<dyn ReadBuffer>) -> Result<u64> {
        let offset_bytes = self.offset_bytes();
        let result = self.copy_from_buffer(buffer);
        self.finish(result.map(|()| offset_bytes))
    }

    fn finish(self, result: Result<u64>) -> Result<u64> {
        if let Err(e) = &result {
            tracing::warn!(
                "Put of {} bytes at offset {} of block at sector {} failed: {}",
                self.size_bytes,
                self.offset_bytes(),
                self.reference.offset_sectors(),
                e
            );
        }
        // Dropping self releases the reference taken by put().
        result
    }

    fn sector_writer(&self) -> SectorWriter<'_> {
        let allocator = self.reference.allocator();
        SectorWriter::new(
            allocator.device.as_ref(),
            allocator.sector_size_bytes,
            self.reference.offset_sectors() + self.write_offset_sectors,
        )
    }

    fn copy_from_reader<R: Read>(&self, source: R) -> Result<()> {
        let mut writer = self.sector_writer();
        let mut limited = source.take(self.size_bytes);
        let overrun = io::copy(&mut limited, &mut writer)
            .and_then(|_| has_more_data(&mut limited.into_inner()));

        let accepted = writer.bytes_accepted();
        self.zero_fill(&mut writer)?;
        writer.finish()?;

        if overrun? {
            return Err(BlockStoreError::SourceTooLong {
                expected: self.size_bytes,
            });
        }
        if accepted != self.size_bytes {
            return Err(BlockStoreError::SizeMismatch {
                expected: self.size_bytes,
                actual: accepted,
            });
        }
        Ok(())
    }

    fn copy_from_buffer(&self, buffer: Box<dyn ReadBuffer>) -> Result<()> {
        if buffer.size_bytes() != self.size_bytes {
            return Err(BlockStoreError::SizeMismatch {
                expected: self.size_bytes,
                actual: buffer.size_bytes(),
            });
        }

        let mut writer = self.sector_writer();
        let copied = buffer.into_writer(&mut writer);
        self.zero_fill(&mut writer)?;
        writer.finish()?;
        copied.map(|_| ())
    }

    /// Append zeros until the whole reservation has been covered.
    fn zero_fill(&self, writer: &mut SectorWriter<'_>) -> io::Result<()> {
        const ZEROS: [u8; 4096] = [0; 4096];
        while writer.bytes_accepted() < self.size_bytes {
            let remaining = self.size_bytes - writer.bytes_accepted();
            let n = remaining.min(ZEROS.len() as u64) as usize;
            writer.append(&ZEROS[..n])?;
        }
        Ok(())
    }
}

fn has_more_data<R: Read>(source: &mut R) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    loop {
        match source.read(&mut probe) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
