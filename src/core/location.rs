//! Serializable block location descriptor
//!
//! A [`BlockLocation`] is the only piece of allocator state that outlives the
//! process. The generational block list stores it next to its own metadata
//! and hands it back to [`new_block_at_location`] on startup.
//!
//! [`new_block_at_location`]: crate::core::allocator::BlockAllocator::new_block_at_location

use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Byte offset of the block on the device
    pub offset_bytes: u64,
    /// Size of the block in bytes
    pub size_bytes: u64,
}

impl BlockLocation {
    pub fn new(offset_bytes: u64, size_bytes: u64) -> Self {
        BlockLocation {
            offset_bytes,
            size_bytes,
        }
    }

    /// Compact binary form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset_bytes, self.size_bytes)
    }
}
