//! Free-list registry
//!
//! For every level there are two circular doubly linked lists, one for free
//! *smaller* children and one for free *larger* children. The lists don't own any
//! storage: the forward link is the `next` of [`Child::Free`] and the backward
//! link is [`Node::link`](super::node::Node::link). That only works because a live
//! node never has more than one free child.

use super::arena::NodeArena;
use super::node::{Child, NodeIndex, Position};

/// Heads of the per-level, per-position free rings
#[derive(Debug, Clone)]
pub struct FreeLists {
    /// `[level][position]`, `None` if the ring is empty
    heads: Vec<[Option<NodeIndex>; 2]>,
}

impl FreeLists {
    /// Create empty free lists for levels `0..=largest_level`
    pub fn new(largest_level: usize) -> Self {
        Self {
            heads: vec![[None, None]; largest_level + 1],
        }
    }

    /// Number of levels tracked
    pub fn levels(&self) -> usize {
        self.heads.len()
    }

    /// Oldest free entry of a ring
    #[inline]
    pub fn head(&self, level: usize, position: Position) -> Option<NodeIndex> {
        self.heads[level][position.index()]
    }

    /// Whether any slot on `level` is free
    #[inline]
    pub fn has_free(&self, level: usize) -> bool {
        self.heads[level].iter().any(Option::is_some)
    }

    /// A free slot on `level`, preferring smaller children so that free larger
    /// blocks stay available for bigger requests
    pub fn pick(&self, level: usize) -> Option<(NodeIndex, Position)> {
        Position::BOTH
            .into_iter()
            .find_map(|position| self.head(level, position).map(|node| (node, position)))
    }

    /// Mark a child slot free and add it to the ring for (`level`, `position`)
    ///
    /// The new entry goes right before the head, so the head stays the oldest one.
    pub fn push(
        &mut self,
        nodes: &mut NodeArena,
        node: NodeIndex,
        position: Position,
        level: usize,
    ) {
        debug_assert!(
            !nodes[node].child(position.sibling()).is_free(),
            "node {} would have two free children",
            node
        );
        let head = &mut self.heads[level][position.index()];
        match *head {
            Some(next) => {
                let prev = nodes[next]
                    .link
                    .expect("free list entry without a previous link");
                debug_assert_eq!(nodes[prev].child(position), Child::Free { next });
                nodes[prev].set_child(position, Child::Free { next: node });
                nodes[next].link = Some(node);
                nodes[node].set_child(position, Child::Free { next });
                nodes[node].link = Some(prev);
            }
            None => {
                nodes[node].set_child(position, Child::Free { next: node });
                nodes[node].link = Some(node);
                *head = Some(node);
            }
        }
    }

    /// Remove a free child slot from its ring
    ///
    /// The slot is left as [`Child::Allocated`]; the caller gives it its real state.
    pub fn unlink(
        &mut self,
        nodes: &mut NodeArena,
        node: NodeIndex,
        position: Position,
        level: usize,
    ) {
        let next = match nodes[node].child(position) {
            Child::Free { next } => next,
            other => panic!(
                "Unlinking node {} {:?} child that isn't free ({:?})",
                node, position, other
            ),
        };
        let prev = nodes[node]
            .link
            .expect("free list entry without a previous link");
        let head = &mut self.heads[level][position.index()];
        if next != node {
            debug_assert!(prev != node);
            debug_assert_eq!(nodes[prev].child(position), Child::Free { next: node });
            debug_assert_eq!(nodes[next].link, Some(node));
            nodes[prev].set_child(position, Child::Free { next });
            nodes[next].link = Some(prev);
            if *head == Some(node) {
                *head = Some(next);
            }
        } else {
            debug_assert_eq!(prev, node);
            debug_assert_eq!(*head, Some(node));
            *head = None;
        }
        nodes[node].set_child(position, Child::Allocated);
        nodes[node].link = None;
    }

    /// Walk a ring starting at its head
    ///
    /// Stops after visiting every node once, even if the ring is damaged.
    pub fn members(&self, nodes: &NodeArena, level: usize, position: Position) -> Vec<NodeIndex> {
        let mut members = Vec::new();
        let Some(head) = self.head(level, position) else {
            return members;
        };
        let mut current = head;
        loop {
            members.push(current);
            match nodes[current].child(position) {
                Child::Free { next } if next != head && members.len() < nodes.len() => {
                    current = next
                }
                _ => break,
            }
        }
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(count: usize) -> (NodeArena, Vec<NodeIndex>) {
        let mut arena = NodeArena::default();
        let nodes = (0..count).map(|_| arena.append()).collect();
        (arena, nodes)
    }

    #[test]
    fn test_singleton_ring_links_to_itself() {
        let (mut arena, nodes) = arena_with(2);
        let mut lists = FreeLists::new(3);
        assert!(!lists.has_free(2));

        lists.push(&mut arena, nodes[1], Position::Larger, 2);
        assert!(lists.has_free(2));
        assert_eq!(arena[nodes[1]].child(Position::Larger), Child::Free { next: nodes[1] });
        assert_eq!(arena[nodes[1]].link, Some(nodes[1]));
        assert_eq!(lists.pick(2), Some((nodes[1], Position::Larger)));

        lists.unlink(&mut arena, nodes[1], Position::Larger, 2);
        assert!(!lists.has_free(2));
        assert_eq!(arena[nodes[1]].child(Position::Larger), Child::Allocated);
    }

    #[test]
    fn test_push_keeps_oldest_at_head() {
        let (mut arena, nodes) = arena_with(4);
        let mut lists = FreeLists::new(5);
        for &node in &nodes[1..] {
            lists.push(&mut arena, node, Position::Smaller, 5);
        }
        assert_eq!(lists.head(5, Position::Smaller), Some(nodes[1]));
        assert_eq!(lists.members(&arena, 5, Position::Smaller), nodes[1..].to_vec());
    }

    #[test]
    fn test_unlink_middle_and_head() {
        let (mut arena, nodes) = arena_with(4);
        let mut lists = FreeLists::new(1);
        for &node in &nodes[1..] {
            lists.push(&mut arena, node, Position::Larger, 1);
        }

        lists.unlink(&mut arena, nodes[2], Position::Larger, 1);
        assert_eq!(lists.members(&arena, 1, Position::Larger), vec![nodes[1], nodes[3]]);

        lists.unlink(&mut arena, nodes[1], Position::Larger, 1);
        assert_eq!(lists.head(1, Position::Larger), Some(nodes[3]));
        assert_eq!(lists.members(&arena, 1, Position::Larger), vec![nodes[3]]);
        assert_eq!(arena[nodes[3]].link, Some(nodes[3]));
    }

    #[test]
    fn test_pick_prefers_smaller() {
        let (mut arena, nodes) = arena_with(3);
        let mut lists = FreeLists::new(2);
        lists.push(&mut arena, nodes[1], Position::Larger, 2);
        lists.push(&mut arena, nodes[2], Position::Smaller, 2);
        assert_eq!(lists.pick(2), Some((nodes[2], Position::Smaller)));
        assert_eq!(lists.pick(0), None);
        assert_eq!(lists.levels(), 3);
    }
}
