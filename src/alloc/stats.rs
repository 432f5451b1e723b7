//! Allocator statistics

use serde::Serialize;

/// Running counters kept by the allocator
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counters {
    /// Successful allocations
    pub allocations: u64,
    /// Frees
    pub frees: u64,
    /// Allocation requests that didn't fit
    pub failed_allocations: u64,
    /// Nodes created by splitting a free block
    pub splits: u64,
    /// Nodes recycled by merging two free siblings
    pub merges: u64,
}

/// Free slots on one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub level: usize,
    pub block_size: u64,
    pub free_smaller: usize,
    pub free_larger: usize,
}

impl LevelStats {
    pub fn free_blocks(&self) -> usize {
        self.free_smaller + self.free_larger
    }
}

/// Snapshot of the allocator state
#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStats {
    pub label: String,
    pub capacity: u64,
    pub largest_level: usize,
    /// Outstanding allocations
    pub allocation_count: u64,
    /// Units covered by outstanding allocations
    pub allocated_units: u64,
    pub free_units: u64,
    /// Size of the largest free block, 0 if the pool is full
    pub largest_free_block: u64,
    /// Nodes in the arena, live and recycled
    pub node_count: usize,
    pub live_nodes: usize,
    pub recycled_nodes: usize,
    pub counters: Counters,
    /// Levels that have at least one free slot, smallest first
    pub levels: Vec<LevelStats>,
}

impl AllocatorStats {
    /// Share of free space that can't be handed out as one block
    ///
    /// 0.0 when all free space is a single block (or nothing is free).
    pub fn fragmentation(&self) -> f64 {
        if self.free_units == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block as f64 / self.free_units as f64
    }

    /// Fraction of the pool that is allocated
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.allocated_units as f64 / self.capacity as f64
    }

    /// Total number of free slots across all levels
    pub fn free_blocks(&self) -> usize {
        self.levels.iter().map(LevelStats::free_blocks).sum()
    }
}
