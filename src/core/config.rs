//! Store configuration
//!
//! Configuration is read from TOML:
//!
//! ```toml
//! [device]
//! kind = "file"
//! path = "/var/cache/blobs.dat"
//!
//! [allocator]
//! sector_size_bytes = 4096
//! block_sector_count = 256
//! block_count = 64
//!
//! [growing_policy]
//! kind = "immutable"
//! current_blocks = 32
//! new_blocks = 8
//! ```

use crate::core::allocator::BlockDeviceBackedAllocator;
use crate::core::buffer::ReadBufferFactory;
use crate::core::device::{BlockDevice, FileBlockDevice, MemoryBlockDevice};
use crate::core::error::{BlockStoreError, Result};
use crate::core::growing_policy::{
    BlockListGrowingPolicy, ImmutableBlockListGrowingPolicy, MutableBlockListGrowingPolicy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Geometry of the device partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Minimum unit of I/O against the device
    pub sector_size_bytes: usize,
    /// Sectors per block
    pub block_sector_count: u64,
    /// Number of blocks the device is split into
    pub block_count: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            sector_size_bytes: 4096,
            block_sector_count: 256,
            block_count: 64,
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sector_size_bytes == 0 {
            return Err(BlockStoreError::InvalidConfig(
                "sector_size_bytes must be non-zero".to_string(),
            ));
        }
        if self.block_sector_count == 0 {
            return Err(BlockStoreError::InvalidConfig(
                "block_sector_count must be non-zero".to_string(),
            ));
        }
        if self.block_count == 0 {
            return Err(BlockStoreError::InvalidConfig(
                "block_count must be non-zero".to_string(),
            ));
        }
        self.device_size_bytes()?;
        Ok(())
    }

    pub fn block_size_bytes(&self) -> Result<u64> {
        self.block_sector_count
            .checked_mul(self.sector_size_bytes as u64)
            .ok_or_else(|| BlockStoreError::InvalidConfig("block size overflows u64".to_string()))
    }

    /// Bytes of device needed to hold every block
    pub fn device_size_bytes(&self) -> Result<u64> {
        self.block_size_bytes()?
            .checked_mul(self.block_count as u64)
            .ok_or_else(|| BlockStoreError::InvalidConfig("device size overflows u64".to_string()))
    }
}

/// Where blocks are stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceConfig {
    /// Volatile RAM-backed device
    Memory,
    /// File or device node, created and sized on first use
    File { path: PathBuf },
}

impl DeviceConfig {
    /// Open the device with room for at least `size_bytes`.
    pub fn open(&self, size_bytes: u64) -> Result<Arc<dyn BlockDevice>> {
        match self {
            DeviceConfig::Memory => {
                let size = usize::try_from(size_bytes).map_err(|_| {
                    BlockStoreError::InvalidConfig(format!(
                        "{} bytes do not fit in memory",
                        size_bytes
                    ))
                })?;
                Ok(Arc::new(MemoryBlockDevice::new(size)))
            }
            DeviceConfig::File { path } => Ok(Arc::new(FileBlockDevice::open(path, size_bytes)?)),
        }
    }
}

/// Which [`BlockListGrowingPolicy`] the block list uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowingPolicyConfig {
    Immutable {
        current_blocks: usize,
        new_blocks: usize,
    },
    Mutable {
        current_blocks: usize,
    },
}

impl GrowingPolicyConfig {
    /// Most blocks the current and new groups can hold together
    pub fn max_current_and_new_blocks(&self) -> usize {
        match self {
            GrowingPolicyConfig::Immutable {
                current_blocks,
                new_blocks,
            } => current_blocks + new_blocks,
            GrowingPolicyConfig::Mutable { current_blocks } => current_blocks + 1,
        }
    }

    pub fn build(&self) -> Box<dyn BlockListGrowingPolicy> {
        match *self {
            GrowingPolicyConfig::Immutable {
                current_blocks,
                new_blocks,
            } => Box::new(ImmutableBlockListGrowingPolicy::new(current_blocks, new_blocks)),
            GrowingPolicyConfig::Mutable { current_blocks } => {
                Box::new(MutableBlockListGrowingPolicy::new(current_blocks))
            }
        }
    }
}

/// Complete configuration of one local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    pub growing_policy: GrowingPolicyConfig,
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate all fields
    ///
    /// Checks:
    /// - Allocator geometry is non-zero and does not overflow
    /// - The growing policy never wants more blocks than the device holds
    pub fn validate(&self) -> Result<()> {
        self.allocator.validate()?;

        let wanted = self.growing_policy.max_current_and_new_blocks();
        if wanted > self.allocator.block_count {
            return Err(BlockStoreError::InvalidConfig(format!(
                "growing policy wants up to {} blocks, but only {} are available",
                wanted, self.allocator.block_count
            )));
        }
        Ok(())
    }

    /// Open the device and build an allocator over it.
    pub fn open_allocator(
        &self,
        buffer_factory: Arc<dyn ReadBufferFactory>,
    ) -> Result<BlockDeviceBackedAllocator> {
        let device = self.device.open(self.allocator.device_size_bytes()?)?;
        BlockDeviceBackedAllocator::new(device, buffer_factory, &self.allocator)
    }
}
