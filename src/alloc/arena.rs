//! Node arena with a recycle stack
//!
//! Nodes live in a `Vec` and are addressed by [`NodeIndex`], so indices stay valid
//! when the table grows. Nodes released by merges go onto a singly linked stack
//! threaded through [`Node::link`] and are reused by the next split, which bounds
//! the table to the largest number of splits ever live at once.

use super::node::{Node, NodeIndex};
use crate::error::{Error, Result};
use std::ops::{Index, IndexMut};

/// Index-addressed table of split nodes, live and recycled
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
    /// Top of the recycle stack
    recycled: Option<NodeIndex>,
    recycled_count: usize,
}

impl NodeArena {
    /// Create an empty arena with room for `capacity` nodes
    ///
    /// Fails instead of aborting if the table can't be reserved.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(capacity).map_err(|e| {
            Error::InvalidArgument(format!("cannot reserve {} nodes: {}", capacity, e))
        })?;
        Ok(Self {
            nodes,
            recycled: None,
            recycled_count: 0,
        })
    }

    /// Grow the table by one vacant node
    pub fn append(&mut self) -> NodeIndex {
        let index = NodeIndex::new(self.nodes.len());
        self.nodes.push(Node::vacant());
        index
    }

    /// Push a node that is no longer part of the tree onto the recycle stack
    pub fn recycle(&mut self, index: NodeIndex) {
        debug_assert!(index != NodeIndex::ROOT, "the root node is never recycled");
        let previous = self.recycled;
        self.nodes[index.get()].link = previous;
        self.recycled = Some(index);
        self.recycled_count += 1;
    }

    /// Reuse the most recently recycled node, or append a new one
    pub fn allocate_node_slot(&mut self) -> NodeIndex {
        match self.recycled {
            Some(index) => {
                let node = &mut self.nodes[index.get()];
                self.recycled = node.link;
                *node = Node::vacant();
                self.recycled_count -= 1;
                index
            }
            None => self.append(),
        }
    }

    /// Total number of nodes, live and recycled
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes currently part of the tree
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.recycled_count
    }

    /// Number of nodes waiting on the recycle stack
    pub fn recycled_count(&self) -> usize {
        self.recycled_count
    }

    /// Walk the recycle stack from the top
    pub fn recycled(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(self.recycled, move |index| self.nodes[index.get()].link)
            .take(self.nodes.len())
    }
}

impl Index<NodeIndex> for NodeArena {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.get()]
    }
}

impl IndexMut<NodeIndex> for NodeArena {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.get()]
    }
}
