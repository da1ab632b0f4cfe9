//! Sector-aligned append-only writer
//!
//! Converts an arbitrary byte stream into whole-sector device writes. A
//! trailing partial sector is buffered in memory until it fills up or the
//! writer is finished, at which point it is zero padded. The device is never
//! read, so no read-modify-write cycle is ever issued.

use crate::core::device::BlockDevice;
use std::io;

pub struct SectorWriter<'a> {
    device: &'a dyn BlockDevice,
    partial_sector: Vec<u8>,
    sector_size_bytes: usize,
    /// Device sector that the next full sector lands on
    offset_sectors: u64,
    bytes_accepted: u64,
}

impl<'a> SectorWriter<'a> {
    /// Create a writer that starts at `offset_sectors` on `device`.
    pub fn new(device: &'a dyn BlockDevice, sector_size_bytes: usize, offset_sectors: u64) -> Self {
        assert!(sector_size_bytes > 0, "sector size must be non-zero");
        SectorWriter {
            device,
            partial_sector: Vec::with_capacity(sector_size_bytes),
            sector_size_bytes,
            offset_sectors,
            bytes_accepted: 0,
        }
    }

    /// Number of logical bytes handed to the writer so far
    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted
    }

    /// Sector offset where the next complete sector will be written
    pub fn offset_sectors(&self) -> u64 {
        self.offset_sectors
    }

    fn sector_byte_offset(&self) -> u64 {
        self.offset_sectors * self.sector_size_bytes as u64
    }

    /// Append `data`, writing out every sector that becomes complete.
    ///
    /// On error the device may contain a prefix of the full sectors.
    pub fn append(&mut self, mut data: &[u8]) -> io::Result<()> {
        let sector_size = self.sector_size_bytes;

        if !self.partial_sector.is_empty() {
            let leading = data.len().min(sector_size - self.partial_sector.len());
            self.partial_sector.extend_from_slice(&data[..leading]);
            self.bytes_accepted += leading as u64;
            data = &data[leading..];
            if self.partial_sector.len() < sector_size {
                return Ok(());
            }

            self.device
                .write_at(&self.partial_sector, self.sector_byte_offset())?;
            self.partial_sector.clear();
            self.offset_sectors += 1;
        }

        // Whole sectors go straight to the device without being copied.
        let aligned = data.len() / sector_size * sector_size;
        if aligned > 0 {
            self.device
                .write_at(&data[..aligned], self.sector_byte_offset())?;
            self.offset_sectors += (aligned / sector_size) as u64;
            self.bytes_accepted += aligned as u64;
        }

        let tail = &data[aligned..];
        self.partial_sector.extend_from_slice(tail);
        self.bytes_accepted += tail.len() as u64;
        Ok(())
    }

    /// Zero-pad and write the pending partial sector, if any.
    ///
    /// Returns the sector offset following the last sector written.
    pub fn finish(mut self) -> io::Result<u64> {
        self.flush_partial_sector()?;
        Ok(self.offset_sectors)
    }

    fn flush_partial_sector(&mut self) -> io::Result<()> {
        if self.partial_sector.is_empty() {
            return Ok(());
        }

        // Padding means the old sector contents never need to be loaded.
        self.partial_sector.resize(self.sector_size_bytes, 0);
        self.device
            .write_at(&self.partial_sector, self.sector_byte_offset())?;
        self.partial_sector.clear();
        self.offset_sectors += 1;
        Ok(())
    }
}

impl io::Write for SectorWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    /// Complete sectors are already on the device; the pending partial
    /// sector is only written by [`SectorWriter::finish`].
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
