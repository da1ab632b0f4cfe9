//! Block storage engine
//!
//! - [`device`] - raw block devices (file and memory backed)
//! - [`sector_writer`] - sector-aligned writes without read-modify-write
//! - [`allocator`] - reference-counted blocks and the free list
//! - [`growing_policy`] - when a generational block list may grow
//! - [`buffer`] - digests and integrity-checked read buffers
//! - [`location`] - persistable block descriptors
//! - [`config`] - TOML configuration
//! - [`metrics`] - allocator activity counters

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod growing_policy;
pub mod location;
pub mod metrics;
pub mod sector_writer;
