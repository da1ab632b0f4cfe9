//! Block list growing policies
//!
//! The generational block list keeps its blocks in three groups: "old"
//! blocks are only read from, "current" blocks hold recently refreshed data
//! and "new" blocks accept writes. Before allocating, it asks a
//! [`BlockListGrowingPolicy`] whether the current or new group may grow.

/// Decides whether the number of blocks in a block list may grow
pub trait BlockListGrowingPolicy: Send + Sync {
    fn should_grow_new_blocks(&self, current_blocks: usize, new_blocks: usize) -> bool;
    fn should_grow_current_blocks(&self, current_blocks: usize) -> bool;
}

/// Policy for stores of immutable objects, such as the Content Addressable
/// Storage.
///
/// New objects may be spread over many "new" blocks, which evens out wear and
/// amortizes the cost of refreshing them later. If there are few "current"
/// blocks the number of "new" blocks may exceed its configured size, keeping
/// the combined total at the target. Current blocks are never written to
/// directly, so they never grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmutableBlockListGrowingPolicy {
    desired_current_and_new_blocks: usize,
}

impl ImmutableBlockListGrowingPolicy {
    pub fn new(current_blocks: usize, new_blocks: usize) -> Self {
        ImmutableBlockListGrowingPolicy {
            desired_current_and_new_blocks: current_blocks + new_blocks,
        }
    }
}

impl BlockListGrowingPolicy for ImmutableBlockListGrowingPolicy {
    fn should_grow_new_blocks(&self, current_blocks: usize, new_blocks: usize) -> bool {
        current_blocks + new_blocks < self.desired_current_and_new_blocks
    }

    fn should_grow_current_blocks(&self, _current_blocks: usize) -> bool {
        false
    }
}

/// Policy for stores whose entries may be overwritten, such as an action
/// cache.
///
/// Updating an entry replaces its location in the map, which only works if
/// writes land in one place. There is therefore exactly one "new" block, and
/// the "current" group may grow up to its configured size instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutableBlockListGrowingPolicy {
    desired_current_blocks: usize,
}

impl MutableBlockListGrowingPolicy {
    pub fn new(current_blocks: usize) -> Self {
        MutableBlockListGrowingPolicy {
            desired_current_blocks: current_blocks,
        }
    }
}

impl BlockListGrowingPolicy for MutableBlockListGrowingPolicy {
    fn should_grow_new_blocks(&self, _current_blocks: usize, new_blocks: usize) -> bool {
        new_blocks < 1
    }

    fn should_grow_current_blocks(&self, current_blocks: usize) -> bool {
        current_blocks < self.desired_current_blocks
    }
}
