//! Fibonacci buddy allocator
//!
//! Hands out offsets in a pool whose size is a Fibonacci number. Every block on
//! level `L` splits into a smaller block on level `L - 2` and a larger block on
//! level `L - 1`, so sizes stay Fibonacci numbers all the way down.
//!
//! # Architecture
//!
//! ```text
//! FibAlloc (largest level 4, 8 units)
//!   root ─larger─→ #1 [0, 8)
//!                   ├─ smaller [0, 3)  level 2  Allocated
//!                   └─ larger  [3, 8)  level 3  Free ──→ free list (3, larger)
//!
//! NodeArena:  [#0 root] [#1] [#2 recycled] ...   recycle stack: #2 → none
//! FreeLists:  level 0..=4 × {smaller, larger} circular lists through the nodes
//! ```
//!
//! Allocation picks a free block on the preferred level, or splits the nearest
//! larger one down to it. Freeing walks the path from the root to the block and
//! merges siblings back while both are free.

pub mod allocator;
pub mod arena;
pub mod bench;
pub mod free_list;
pub mod node;
pub mod production_tests;
pub mod sizes;
pub mod stats;

pub use allocator::{Allocation, Block, FibAlloc};
pub use arena::NodeArena;
pub use free_list::FreeLists;
pub use node::{Child, Node, NodeIndex, Position};
pub use sizes::{level_for_at_least, level_for_at_most, size, LEVEL_COUNT, MAX_LEVEL, SIZES};
pub use stats::{AllocatorStats, Counters, LevelStats};
