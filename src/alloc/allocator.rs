//! Fibonacci buddy allocator implementation

use super::arena::NodeArena;
use super::free_list::FreeLists;
use super::node::{child_level, child_offset, Child, NodeIndex, Position};
use super::sizes::{level_for_at_least, level_for_at_most, size, LEVEL_COUNT, MAX_LEVEL};
use super::stats::{AllocatorStats, Counters, LevelStats};
use crate::config::{FibAllocConfig, DEFAULT_LABEL};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, trace, warn};

/// A block handed out by [`FibAlloc::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    /// Start of the block within the pool
    pub offset: u64,
    /// Level of the block, which may be below the preferred one
    pub level: usize,
    /// Size of the block in units, `size(level)`
    pub size: u64,
}

impl Allocation {
    fn new(offset: u64, level: usize) -> Self {
        Self {
            offset,
            level,
            size: size(level),
        }
    }

    /// One past the last unit of the block
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) level {}", self.offset, self.end(), self.level)
    }
}

/// A leaf of the allocation tree, free or allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    pub offset: u64,
    pub level: usize,
    pub size: u64,
    pub allocated: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct PathStep {
    node: NodeIndex,
    position: Position,
    /// Level of the child slot, stored because level 0 is the smaller child of both
    /// level 1 and level 2 nodes
    level: usize,
}

/// Route from the pseudo-root down to an allocated leaf
struct Path {
    steps: [PathStep; LEVEL_COUNT + 1],
    len: usize,
}

impl Path {
    fn new() -> Self {
        Self {
            steps: [PathStep::default(); LEVEL_COUNT + 1],
            len: 0,
        }
    }

    fn push(&mut self, step: PathStep) {
        self.steps[self.len] = step;
        self.len += 1;
    }

    fn steps(&self) -> &[PathStep] {
        &self.steps[..self.len]
    }
}

/// A child slot reached while walking the tree
#[derive(Debug, Clone, Copy)]
struct SlotRef {
    node: NodeIndex,
    position: Position,
    level: usize,
    offset: u64,
}

/// Fibonacci-number buddy allocator over a fixed range of offsets
///
/// The pool `[0, size(largest_level))` is recursively split into a smaller and a
/// larger block whose sizes are consecutive-ish Fibonacci numbers. Free blocks sit
/// in per-level free lists, and two free siblings are merged back immediately.
///
/// The allocator does no locking. `allocate` and `free` take `&mut self`; callers
/// sharing an instance between threads must wrap it in their own lock. Independent
/// instances need no coordination.
#[derive(Debug, Clone)]
pub struct FibAlloc {
    label: String,
    largest_level: usize,
    nodes: NodeArena,
    free_lists: FreeLists,
    allocation_count: u64,
    allocated_units: u64,
    counters: Counters,
}

impl FibAlloc {
    /// Create an allocator whose pool is one block of `largest_level`
    pub fn new(largest_level: usize) -> Result<Self> {
        Self::build(DEFAULT_LABEL.to_string(), largest_level, None)
    }

    /// Create an allocator with a name used in logs and metrics
    pub fn with_label(label: impl Into<String>, largest_level: usize) -> Result<Self> {
        Self::build(label.into(), largest_level, None)
    }

    /// Create an allocator for the largest block that fits `capacity` units
    pub fn with_capacity(capacity: u64) -> Result<Self> {
        let level = level_for_at_most(capacity)
            .ok_or_else(|| Error::InvalidArgument("capacity must be at least 1".to_string()))?;
        Self::new(level)
    }

    /// Create an allocator from configuration
    pub fn from_config(config: &FibAllocConfig) -> Result<Self> {
        let largest_level = config.resolve_largest_level()?;
        let reserve_nodes = config.resolve_reserve_nodes(largest_level)?;
        Self::build(config.label.clone(), largest_level, Some(reserve_nodes))
    }

    /// `reserve_nodes` defaults to one node per level, enough for a single split path
    fn build(label: String, largest_level: usize, reserve_nodes: Option<usize>) -> Result<Self> {
        if largest_level > MAX_LEVEL {
            return Err(Error::InvalidArgument(format!(
                "largest level {} exceeds the maximum of {}",
                largest_level, MAX_LEVEL
            )));
        }

        let reserve_nodes = reserve_nodes.unwrap_or(largest_level + 1).max(1);
        let mut nodes = NodeArena::try_with_capacity(reserve_nodes)?;
        let mut free_lists = FreeLists::new(largest_level);

        // The root holds the whole pool as its larger child. Its smaller child doesn't
        // exist and stays marked allocated so merging always stops at the root.
        let root = nodes.append();
        debug_assert_eq!(root, NodeIndex::ROOT);
        free_lists.push(&mut nodes, root, Position::Larger, largest_level);

        info!(
            label = %label,
            largest_level,
            capacity = size(largest_level),
            "Initialized Fibonacci allocator"
        );

        Ok(Self {
            label,
            largest_level,
            nodes,
            free_lists,
            allocation_count: 0,
            allocated_units: 0,
            counters: Counters::default(),
        })
    }

    /// Name used in logs and metrics
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Level of the whole pool
    pub fn largest_level(&self) -> usize {
        self.largest_level
    }

    /// Total pool size in units
    pub fn capacity(&self) -> u64 {
        size(self.largest_level)
    }

    /// Whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.allocation_count == 0
    }

    /// Number of outstanding allocations
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Units covered by outstanding allocations
    pub fn allocated_units(&self) -> u64 {
        self.allocated_units
    }

    /// Allocate a block of at least `minimum` units, ideally `preferred` units
    ///
    /// Takes a block of the preferred size, splitting a larger free block if needed.
    /// If nothing at or above the preferred size is free, falls back to the largest
    /// free block that still holds `minimum` units. The returned
    /// [`Allocation::level`] tells which size was actually handed out.
    ///
    /// Returns [`Error::Exhausted`] if no free block holds `minimum` units.
    pub fn allocate(&mut self, minimum: u64, preferred: u64) -> Result<Allocation> {
        if minimum == 0 {
            return Err(Error::InvalidArgument(
                "minimum allocation size must be at least 1".to_string(),
            ));
        }

        let minimum_level = match level_for_at_least(minimum) {
            Some(level) if level <= self.largest_level => level,
            _ => return Err(self.exhausted(minimum)),
        };
        let preferred_level = level_for_at_least(preferred)
            .unwrap_or(self.largest_level)
            .clamp(minimum_level, self.largest_level);

        // Take a free block on the preferred level or split a larger one; otherwise
        // settle for the largest free block not smaller than the minimum.
        let found = (preferred_level..=self.largest_level)
            .find_map(|level| self.free_lists.pick(level).map(|slot| (level, slot)))
            .or_else(|| {
                (minimum_level..preferred_level)
                    .rev()
                    .find_map(|level| self.free_lists.pick(level).map(|slot| (level, slot)))
            });
        let (mut free_level, (mut donor, mut position)) = match found {
            Some(found) => found,
            None => return Err(self.exhausted(minimum)),
        };
        let allocation_level = preferred_level.min(free_level);

        self.free_lists
            .unlink(&mut self.nodes, donor, position, free_level);

        while free_level > allocation_level {
            let node = self.nodes.allocate_node_slot();
            let donor_offset = self.nodes[donor].offset;
            self.nodes[donor].set_child(position, Child::Split(node));
            self.nodes[node].offset =
                donor_offset + child_offset(free_level, self.largest_level, position);

            // Keep splitting smaller children so the untouched larger sibling stays
            // whole; only the final split continues into the larger child.
            let next = if free_level - allocation_level <= 1 {
                Position::Larger
            } else {
                Position::Smaller
            };
            let spare = next.sibling();
            self.free_lists
                .push(&mut self.nodes, node, spare, child_level(free_level, spare));

            trace!(
                label = %self.label,
                node = %node,
                level = free_level,
                offset = self.nodes[node].offset,
                "Split block"
            );
            self.counters.splits += 1;

            donor = node;
            position = next;
            free_level = child_level(free_level, next);
        }
        debug_assert_eq!(free_level, allocation_level);

        self.nodes[donor].set_child(position, Child::Allocated);
        let offset = self.nodes[donor].offset
            + child_offset(allocation_level, self.largest_level, position);
        let allocation = Allocation::new(offset, allocation_level);

        self.allocation_count += 1;
        self.allocated_units += allocation.size;
        self.counters.allocations += 1;
        debug!(label = %self.label, minimum, preferred, "Allocated {}", allocation);

        Ok(allocation)
    }

    /// Allocate a block of at least `size` units with no size flexibility
    pub fn allocate_exact(&mut self, size: u64) -> Result<Allocation> {
        self.allocate(size, size)
    }

    fn exhausted(&mut self, minimum: u64) -> Error {
        self.counters.failed_allocations += 1;
        debug!(
            label = %self.label,
            minimum,
            allocated = self.allocated_units,
            "Allocation does not fit"
        );
        Error::Exhausted {
            minimum,
            capacity: self.capacity(),
        }
    }

    /// Free a block previously returned by [`allocate`](Self::allocate)
    ///
    /// Free siblings are merged back into their parent block all the way up.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not the start of an outstanding allocation (never
    /// allocated, or already freed). That is a bug in the caller and continuing
    /// would corrupt the tree.
    pub fn free(&mut self, offset: u64) -> Allocation {
        let path = match self.locate(offset) {
            Ok(path) => path,
            Err(e) => {
                error!(label = %self.label, offset, "Invalid free: {}", e);
                panic!("{}", e);
            }
        };
        let steps = path.steps();
        let leaf = steps[steps.len() - 1];
        let allocation = Allocation::new(offset, leaf.level);

        let mut remaining = steps.len();
        while remaining > 0 {
            remaining -= 1;
            let step = steps[remaining];
            let sibling = step.position.sibling();
            if !self.nodes[step.node].child(sibling).is_free() {
                self.free_lists
                    .push(&mut self.nodes, step.node, step.position, step.level);
                break;
            }

            // Both children are free now: drop the sibling from its free list and
            // recycle the node, then free the node's own slot in its parent.
            debug_assert!(remaining != 0, "the root's smaller child is never free");
            let parent_level = steps[remaining - 1].level;
            self.free_lists.unlink(
                &mut self.nodes,
                step.node,
                sibling,
                child_level(parent_level, sibling),
            );
            self.nodes.recycle(step.node);
            self.counters.merges += 1;
            trace!(label = %self.label, node = %step.node, level = parent_level, "Merged block");
        }

        self.allocation_count -= 1;
        self.allocated_units -= allocation.size;
        self.counters.frees += 1;
        debug!(label = %self.label, "Freed {}", allocation);

        allocation
    }

    /// Whether `offset` is the start of an outstanding allocation
    pub fn is_allocated(&self, offset: u64) -> bool {
        self.locate(offset).is_ok()
    }

    /// Descend from the root to the allocated leaf starting at `offset`
    fn locate(&self, offset: u64) -> Result<Path> {
        let mut path = Path::new();
        let mut node = NodeIndex::ROOT;
        let mut node_level = self.largest_level + 1;
        loop {
            let current = &self.nodes[node];
            let larger_offset = current.offset
                + child_offset(
                    child_level(node_level, Position::Larger),
                    self.largest_level,
                    Position::Larger,
                );
            let position = if offset >= larger_offset {
                Position::Larger
            } else {
                Position::Smaller
            };
            let level = child_level(node_level, position);
            path.push(PathStep {
                node,
                position,
                level,
            });

            match current.child(position) {
                Child::Free { .. } => return Err(Error::InvalidFree { offset }),
                Child::Allocated => {
                    let start = match position {
                        Position::Larger => larger_offset,
                        Position::Smaller => current.offset,
                    };
                    if start != offset {
                        return Err(Error::InvalidFree { offset });
                    }
                    return Ok(path);
                }
                Child::Split(child) => {
                    if level == 0 {
                        return Err(Error::Corrupted(format!(
                            "node {} splits a level 0 block",
                            node
                        )));
                    }
                    node = child;
                    node_level = level;
                }
            }
        }
    }

    /// Visit every child slot reachable from the root in offset order, a split slot
    /// before the slots of the node it points to
    fn walk(&self, mut visit: impl FnMut(SlotRef, Child)) {
        let mut stack = vec![SlotRef {
            node: NodeIndex::ROOT,
            position: Position::Larger,
            level: self.largest_level,
            offset: 0,
        }];
        while let Some(slot) = stack.pop() {
            let child = self.nodes[slot.node].child(slot.position);
            visit(slot, child);
            let Child::Split(node) = child else {
                continue;
            };
            if slot.level == 0 {
                continue;
            }
            let base = self.nodes[node].offset;
            // Larger first so the smaller child, which comes first, pops first
            for position in [Position::Larger, Position::Smaller] {
                let level = child_level(slot.level, position);
                stack.push(SlotRef {
                    node,
                    position,
                    level,
                    offset: base + child_offset(level, self.largest_level, position),
                });
            }
        }
    }

    /// Every leaf block in offset order; together they cover the whole pool
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::new();
        self.walk(|slot, child| {
            let allocated = match child {
                Child::Split(_) => return,
                Child::Free { .. } => false,
                Child::Allocated => true,
            };
            blocks.push(Block {
                offset: slot.offset,
                level: slot.level,
                size: size(slot.level),
                allocated,
            });
        });
        blocks
    }

    /// Outstanding allocations in offset order
    pub fn allocations(&self) -> Vec<Allocation> {
        self.blocks()
            .into_iter()
            .filter(|block| block.allocated)
            .map(|block| Allocation::new(block.offset, block.level))
            .collect()
    }

    /// Free blocks in offset order
    pub fn free_blocks(&self) -> Vec<Block> {
        self.blocks().into_iter().filter(|block| !block.allocated).collect()
    }

    /// Snapshot of usage, node and free-list statistics
    pub fn stats(&self) -> AllocatorStats {
        let levels: Vec<LevelStats> = (0..=self.largest_level)
            .filter(|&level| self.free_lists.has_free(level))
            .map(|level| LevelStats {
                level,
                block_size: size(level),
                free_smaller: self.free_lists.members(&self.nodes, level, Position::Smaller).len(),
                free_larger: self.free_lists.members(&self.nodes, level, Position::Larger).len(),
            })
            .collect();
        let largest_free_block = levels.last().map(|level| level.block_size).unwrap_or(0);

        AllocatorStats {
            label: self.label.clone(),
            capacity: self.capacity(),
            largest_level: self.largest_level,
            allocation_count: self.allocation_count,
            allocated_units: self.allocated_units,
            free_units: self.capacity() - self.allocated_units,
            largest_free_block,
            node_count: self.nodes.len(),
            live_nodes: self.nodes.live_count(),
            recycled_nodes: self.nodes.recycled_count(),
            counters: self.counters,
            levels,
        }
    }

    /// Check the whole tree against the free lists and the node arena
    ///
    /// Verifies that leaves tile the pool without gaps or overlaps, that no node has
    /// two free children, that free slots and free-list entries match one to one,
    /// and that every node is either in the tree or on the recycle stack.
    pub fn verify(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();
        let mut expected_offset = 0u64;
        let mut live_nodes = 1usize;
        let mut allocation_count = 0u64;
        let mut allocated_units = 0u64;
        let mut free_slots = HashSet::new();

        self.walk(|slot, child| match child {
            Child::Split(node) => {
                live_nodes += 1;
                let split = &self.nodes[node];
                if slot.level == 0 {
                    problems.push(format!("node {} splits a level 0 block", node));
                }
                if split.offset != slot.offset {
                    problems.push(format!(
                        "node {} starts at {} but its block starts at {}",
                        node, split.offset, slot.offset
                    ));
                }
                if Position::BOTH.iter().all(|&p| split.child(p).is_free()) {
                    problems.push(format!("node {} has two free children", node));
                }
            }
            leaf => {
                if slot.offset != expected_offset {
                    problems.push(format!(
                        "block at {} (level {}) expected at {}",
                        slot.offset, slot.level, expected_offset
                    ));
                }
                expected_offset = slot.offset + size(slot.level);
                if leaf.is_free() {
                    free_slots.insert((slot.node, slot.position, slot.level));
                } else {
                    allocation_count += 1;
                    allocated_units += size(slot.level);
                }
            }
        });

        if expected_offset != self.capacity() {
            problems.push(format!(
                "blocks cover {} units of {}",
                expected_offset,
                self.capacity()
            ));
        }

        for level in 0..=self.largest_level {
            for position in Position::BOTH {
                let members = self.free_lists.members(&self.nodes, level, position);
                for (i, &node) in members.iter().enumerate() {
                    if !free_slots.remove(&(node, position, level)) {
                        problems.push(format!(
                            "free list ({}, {:?}) holds node {} which isn't free there",
                            level, position, node
                        ));
                    }
                    let next = members[(i + 1) % members.len()];
                    if self.nodes[next].link != Some(node) {
                        problems.push(format!(
                            "free list ({}, {:?}) back link of node {} is broken",
                            level, position, next
                        ));
                    }
                }
            }
        }
        for (node, position, level) in free_slots {
            problems.push(format!(
                "free {:?} child of node {} (level {}) is missing from its free list",
                position, node, level
            ));
        }

        if live_nodes != self.nodes.live_count() {
            problems.push(format!(
                "{} nodes in the tree, {} expected",
                live_nodes,
                self.nodes.live_count()
            ));
        }
        if self.nodes.recycled().count() != self.nodes.recycled_count() {
            problems.push("recycle stack length doesn't match its count".to_string());
        }
        if allocation_count != self.allocation_count || allocated_units != self.allocated_units {
            problems.push(format!(
                "tree holds {} allocations ({} units), counters say {} ({} units)",
                allocation_count, allocated_units, self.allocation_count, self.allocated_units
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Corrupted(problems.join("; ")))
        }
    }

    /// Release the allocator
    ///
    /// All allocations should be freed first; outstanding ones are only reported.
    pub fn shutdown(self) {
        if self.allocation_count != 0 {
            warn!(
                label = %self.label,
                allocations = self.allocation_count,
                units = self.allocated_units,
                "Shutting down allocator with outstanding allocations"
            );
        }
        info!(
            label = %self.label,
            nodes = self.nodes.len(),
            allocations = self.counters.allocations,
            "Shut down Fibonacci allocator"
        );
    }
}
