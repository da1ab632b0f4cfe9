//! Allocator activity counters
//!
//! An [`AllocatorMetrics`] instance is handed to the allocator at
//! construction. Several allocators may share one instance to aggregate
//! their activity, or each can own its own.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters are updated from every thread touching a block, so each one
/// sits on its own cache line.
#[derive(Debug, Default)]
pub struct AllocatorMetrics {
    allocations: CachePadded<AtomicU64>,
    releases: CachePadded<AtomicU64>,
    reads_started: CachePadded<AtomicU64>,
    reads_completed: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`AllocatorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Blocks handed out by `new_block` or `new_block_at_location`
    pub allocations: u64,
    /// Blocks whose last reference was dropped
    pub releases: u64,
    /// Reads started through `Block::get`
    pub reads_started: u64,
    /// Readers that have been closed
    pub reads_completed: u64,
}

impl AllocatorStats {
    /// Blocks currently held by at least one handle
    pub fn live_blocks(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    /// Readers that have been opened but not yet closed
    pub fn live_reads(&self) -> u64 {
        self.reads_started.saturating_sub(self.reads_completed)
    }
}

impl AllocatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_started(&self) {
        self.reads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_completed(&self) {
        self.reads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            reads_started: self.reads_started.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
        }
    }
}
