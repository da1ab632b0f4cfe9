//! # blockstore-rs - Block Allocation for Content-Addressable Caches
//!
//! `blockstore-rs` packs binary objects into a fixed-size raw device. The
//! device is split into equally sized **blocks**, each made of fixed-size
//! **sectors**:
//!
//! - **Reference-counted blocks** handed out by a wear-leveling allocator
//! - **Sector-aligned writes** that never read the device first
//! - **Integrity-checked reads** validated against a SHA-256 digest
//! - **Growing policies** for generational (old/current/new) block lists
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockstore_rs::{
//!     AllocatorConfig, BlockAllocator, BlockDeviceBackedAllocator, Digest,
//!     MemoryBlockDevice, Result, ValidatingBufferFactory,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let config = AllocatorConfig {
//!     sector_size_bytes: 512,
//!     block_sector_count: 64,
//!     block_count: 16,
//! };
//! let device = Arc::new(MemoryBlockDevice::new(config.device_size_bytes()? as usize));
//! let allocator =
//!     BlockDeviceBackedAllocator::new(device, Arc::new(ValidatingBufferFactory), &config)?;
//!
//! // Allocate a block and append an object to it
//! let (mut block, location) = allocator.new_block()?;
//! let data = b"Hello, World!";
//! let offset = block.put(data.len() as u64).write(&data[..])?;
//!
//! // Read it back, validated against its digest
//! let buffer = block.get(Digest::compute(data), offset, data.len() as u64, Box::new(|_| {}));
//! assert_eq!(buffer.into_bytes()?, data);
//!
//! // `location` can be persisted and used to re-attach after a restart
//! println!("stored at {}", location);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Block Device                 │
//! ├───────────────┬───────────────┬──────────────┤
//! │ Block 0       │ Block 1       │ Block N-1    │
//! │ [s0][s1]...   │ [s0][s1]...   │ [s0][s1]...  │
//! └───────────────┴───────────────┴──────────────┘
//!        ▲                ▲
//!        │ Block handle   │ free list (FIFO)
//!        │ (refcounted)   │
//! ┌──────┴────────────────┴──────────────────────┐
//! │         BlockDeviceBackedAllocator           │
//! └──────────────────────────────────────────────┘
//! ```

pub mod core;

pub use crate::core::{
    allocator::{Block, BlockAllocator, BlockDeviceBackedAllocator, BlockPutWriter, BlockReader},
    buffer::{
        DataIntegrityCallback, Digest, ReadBuffer, ReadBufferFactory, ValidatingBuffer,
        ValidatingBufferFactory,
    },
    config::{AllocatorConfig, DeviceConfig, GrowingPolicyConfig, StoreConfig},
    device::{BlockDevice, DeviceStats, FileBlockDevice, MemoryBlockDevice},
    error::{BlockStoreError, Result},
    growing_policy::{
        BlockListGrowingPolicy, ImmutableBlockListGrowingPolicy, MutableBlockListGrowingPolicy,
    },
    location::BlockLocation,
    metrics::{AllocatorMetrics, AllocatorStats},
    sector_writer::SectorWriter,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
