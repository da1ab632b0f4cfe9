//! Raw block devices
//!
//! A [`BlockDevice`] is a fixed-size, byte-addressable medium supporting
//! positional reads and writes. The allocator never seeks: every access
//! names its absolute byte offset, so a single device can be shared by any
//! number of threads.

use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(not(unix))]
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Fixed-size random-access storage medium
pub trait BlockDevice: Send + Sync {
    /// Read into `buf` starting at `offset`, returning the number of bytes
    /// read. Fewer bytes than requested are only returned at end of device.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write all of `buf` starting at `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Flush written data to stable storage
    fn sync(&self) -> io::Result<()>;

    /// Total size of the device in bytes
    fn size_bytes(&self) -> u64;
}

/// Counters describing the traffic a [`MemoryBlockDevice`] has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// RAM-backed device
///
/// Records every write as an `(offset, length)` pair, which makes it easy to
/// assert that callers only ever issue sector-aligned writes.
#[derive(Debug)]
pub struct MemoryBlockDevice {
    data: RwLock<Vec<u8>>,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    write_log: Mutex<Vec<(u64, usize)>>,
    fail_writes: AtomicBool,
}

impl MemoryBlockDevice {
    pub fn new(size_bytes: usize) -> Self {
        MemoryBlockDevice {
            data: RwLock::new(vec![0u8; size_bytes]),
            reads: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_log: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Create a device pre-filled with `byte`, useful for proving that
    /// padding never exposes stale contents.
    pub fn filled(size_bytes: usize, byte: u8) -> Self {
        let device = Self::new(size_bytes);
        device.data.write().fill(byte);
        device
    }

    /// Make subsequent writes fail with an I/O error (fault injection).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the raw device contents in `[offset, offset + len)`
    pub fn contents(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.read();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        data[start..end].to_vec()
    }

    /// All writes issued so far, in order
    pub fn write_log(&self) -> Vec<(u64, usize)> {
        self.write_log.lock().clone()
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.write_log.lock().len() as u64,
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.read();
        let start = match usize::try_from(offset) {
            Ok(start) if start < data.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);

        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }

        let mut data = self.data.write();
        let start = usize::try_from(offset)
            .ok()
            .filter(|start| start.saturating_add(buf.len()) <= data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "write of {} bytes at offset {} exceeds device size {}",
                        buf.len(),
                        offset,
                        data.len()
                    ),
                )
            })?;
        data[start..start + buf.len()].copy_from_slice(buf);

        self.write_log.lock().push((offset, buf.len()));
        self.bytes_written
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        self.data.read().len() as u64
    }
}

/// Device backed by a regular file (or a raw device node)
#[derive(Debug)]
pub struct FileBlockDevice {
    file: File,
    path: PathBuf,
    size_bytes: u64,
    #[cfg(not(unix))]
    io_lock: Mutex<()>,
}

impl FileBlockDevice {
    /// Open `path`, creating it if needed and growing it to at least
    /// `size_bytes`. Existing contents are preserved, so a store can be
    /// reopened after a restart.
    pub fn open<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let current = file.metadata()?.len();
        if current < size_bytes {
            file.set_len(size_bytes)?;
        }

        tracing::debug!(
            "Opened file block device {:?} ({} bytes)",
            path.as_ref(),
            size_bytes.max(current)
        );

        Ok(FileBlockDevice {
            file,
            path: path.as_ref().to_path_buf(),
            size_bytes: size_bytes.max(current),
            #[cfg(not(unix))]
            io_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_once(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.file.write_all_at(buf, offset)
        }
        #[cfg(not(unix))]
        {
            let _guard = self.io_lock.lock();
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        }
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl FileBlockDevice {
    #[cfg(unix)]
    fn read_once(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    #[cfg(not(unix))]
    fn read_once(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let _guard = self.io_lock.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}
