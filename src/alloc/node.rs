//! Split-tree nodes
//!
//! Every node records one split of a block into a *smaller* and a *larger* child.
//! For a node on level `L`, the smaller child has `size(L) - size(L - 1)` units and
//! comes first, the larger child has `size(L - 1)` units and follows it. The
//! pseudo-root one level above the largest level only has a larger child, which
//! spans the whole pool.

use super::sizes::size;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable index of a node in the node arena
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// The pseudo-root, created with the allocator and never recycled
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// Create a node index
    ///
    /// Panics if `index` does not fit the arena's index width.
    pub fn new(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(index) => Self(index),
            Err(_) => panic!(
                "Too many Fibonacci allocator nodes created, max {:#X}",
                u32::MAX
            ),
        }
    }

    /// Position of the node in the arena
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which child of a node a slot is
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Smaller = 0,
    Larger = 1,
}

impl Position {
    /// Both positions, smaller first
    pub const BOTH: [Position; 2] = [Position::Smaller, Position::Larger];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The other child of the same node
    #[inline]
    pub fn sibling(self) -> Self {
        match self {
            Position::Smaller => Position::Larger,
            Position::Larger => Position::Smaller,
        }
    }
}

/// State of one child slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Child {
    /// In the free list of its (level, position); `next` is the following ring entry
    Free { next: NodeIndex },
    /// Subdivided further by the given node
    Split(NodeIndex),
    /// Handed out to a caller
    Allocated,
}

impl Child {
    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, Child::Free { .. })
    }
}

/// A split point in the allocation tree
#[derive(Debug, Clone, Copy)]
pub struct Node {
    /// Offset of the smaller child
    pub offset: u64,
    /// Indexed by [`Position::index`]
    pub children: [Child; 2],
    /// Previous entry of the free list holding this node's free child while the node
    /// is live, or the next recycled node while it sits on the recycle stack.
    /// A node has at most one free child, so one link is enough.
    pub link: Option<NodeIndex>,
}

impl Node {
    /// A node with no free children, ready to be wired into the tree
    pub const fn vacant() -> Self {
        Self {
            offset: 0,
            children: [Child::Allocated, Child::Allocated],
            link: None,
        }
    }

    #[inline]
    pub fn child(&self, position: Position) -> Child {
        self.children[position.index()]
    }

    #[inline]
    pub fn set_child(&mut self, position: Position, child: Child) {
        self.children[position.index()] = child;
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::vacant()
    }
}

/// Level of a child of a node on `parent_level`
///
/// Both children of a level 1 node are on level 0.
#[inline]
pub fn child_level(parent_level: usize, position: Position) -> usize {
    debug_assert!(parent_level != 0, "level 0 blocks can't be split");
    let step = match position {
        Position::Smaller => 2,
        Position::Larger => 1,
    };
    parent_level - step.min(parent_level)
}

/// Offset of a child on `child_level` relative to its parent node's offset
///
/// The larger child follows the smaller one, except directly under the pseudo-root
/// where it is the only child.
#[inline]
pub fn child_offset(child_level: usize, largest_level: usize, position: Position) -> u64 {
    debug_assert!(child_level <= largest_level);
    if position == Position::Smaller || child_level >= largest_level {
        return 0;
    }
    size(child_level + 1) - size(child_level)
}
