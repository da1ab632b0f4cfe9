//! Digests and read buffers
//!
//! `Block::get` does not return raw bytes. It hands a [`BlockReader`] over
//! the requested range to a [`ReadBufferFactory`], which wraps it together
//! with the expected [`Digest`] and a [`DataIntegrityCallback`]. The
//! callback tells the owner of the data whether the bytes matched, so a
//! corrupted entry can be dropped from the location map.
//!
//! [`ValidatingBufferFactory`] is the stock implementation: it verifies the
//! size and SHA-256 hash of the range as it is consumed.

use crate::core::allocator::BlockReader;
use crate::core::error::{BlockStoreError, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Content digest: SHA-256 hash and object size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest {
    hash: [u8; 32],
    size_bytes: u64,
}

impl Digest {
    pub fn new(hash: [u8; 32], size_bytes: u64) -> Self {
        Digest { hash, size_bytes }
    }

    /// Digest of `data`
    pub fn compute(data: &[u8]) -> Self {
        Digest {
            hash: Sha256::digest(data).into(),
            size_bytes: data.len() as u64,
        }
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.hash_hex(), self.size_bytes)
    }
}

impl FromStr for Digest {
    type Err = BlockStoreError;

    /// Parse the `"<hex hash>-<size>"` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let (hash_hex, size) = s
            .split_once('-')
            .ok_or_else(|| BlockStoreError::InvalidDigest(format!("missing size in {:?}", s)))?;

        let mut hash = [0u8; 32];
        hex::decode_to_slice(hash_hex, &mut hash)
            .map_err(|e| BlockStoreError::InvalidDigest(format!("bad hash {:?}: {}", hash_hex, e)))?;
        let size_bytes = size
            .parse::<u64>()
            .map_err(|e| BlockStoreError::InvalidDigest(format!("bad size {:?}: {}", size, e)))?;

        Ok(Digest { hash, size_bytes })
    }
}

/// Invoked once with the outcome of validating the data read from a block
pub type DataIntegrityCallback = Box<dyn FnOnce(bool) + Send>;

/// Readable object produced from a byte range of a block
pub trait ReadBuffer: Send {
    /// Declared size of the data
    fn size_bytes(&self) -> u64;

    /// Read the data into memory.
    fn into_bytes(self: Box<Self>) -> Result<Vec<u8>>;

    /// Stream the data into `writer`, returning the number of bytes copied.
    fn into_writer(self: Box<Self>, writer: &mut dyn Write) -> Result<u64>;
}

/// Wraps block readers into [`ReadBuffer`]s
pub trait ReadBufferFactory: Send + Sync {
    fn new_buffer_from_reader_at(
        &self,
        digest: Digest,
        reader: BlockReader,
        size_bytes: u64,
        callback: DataIntegrityCallback,
    ) -> Box<dyn ReadBuffer>;
}

/// Factory for [`ValidatingBuffer`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatingBufferFactory;

impl ReadBufferFactory for ValidatingBufferFactory {
    fn new_buffer_from_reader_at(
        &self,
        digest: Digest,
        reader: BlockReader,
        size_bytes: u64,
        callback: DataIntegrityCallback,
    ) -> Box<dyn ReadBuffer> {
        Box::new(ValidatingBuffer {
            digest,
            reader,
            size_bytes,
            callback,
        })
    }
}

/// Buffer that checks size and SHA-256 of the data against its digest
///
/// The integrity callback fires once the data has been consumed: `true` if it
/// matched, `false` on a size or hash mismatch. Device I/O errors are
/// returned without invoking the callback, since they say nothing about the
/// stored contents.
pub struct ValidatingBuffer {
    digest: Digest,
    reader: BlockReader,
    size_bytes: u64,
    callback: DataIntegrityCallback,
}

const COPY_CHUNK_BYTES: usize = 64 * 1024;
const MAX_PREALLOCATED_BYTES: u64 = 16 * 1024 * 1024;

impl ReadBuffer for ValidatingBuffer {
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn into_bytes(self: Box<Self>) -> Result<Vec<u8>> {
        // The declared size is only trusted once it agrees with the digest.
        let capacity = if self.size_bytes == self.digest.size_bytes() {
            self.size_bytes.min(MAX_PREALLOCATED_BYTES)
        } else {
            0
        };
        let mut data = Vec::with_capacity(capacity as usize);
        self.into_writer(&mut data)?;
        Ok(data)
    }

    fn into_writer(self: Box<Self>, writer: &mut dyn Write) -> Result<u64> {
        let ValidatingBuffer {
            digest,
            mut reader,
            size_bytes,
            callback,
        } = *self;

        if size_bytes != digest.size_bytes() {
            callback(false);
            return Err(BlockStoreError::SizeMismatch {
                expected: digest.size_bytes(),
                actual: size_bytes,
            });
        }

        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; COPY_CHUNK_BYTES.min(size_bytes.max(1) as usize)];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            writer.write_all(&chunk[..n])?;
            copied += n as u64;
        }

        if copied != size_bytes {
            tracing::warn!(
                "Short read for {}: expected {} bytes, got {}",
                digest,
                size_bytes,
                copied
            );
            callback(false);
            return Err(BlockStoreError::SizeMismatch {
                expected: size_bytes,
                actual: copied,
            });
        }

        let actual: [u8; 32] = hasher.finalize().into();
        if actual != *digest.hash() {
            tracing::warn!("Digest mismatch for {}", digest);
            callback(false);
            return Err(BlockStoreError::DigestMismatch {
                expected: digest.hash_hex(),
                actual: hex::encode(actual),
            });
        }

        callback(true);
        Ok(copied)
    }
}
