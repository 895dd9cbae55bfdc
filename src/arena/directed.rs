//! Insertion-ordered [arena allocated](https://en.wikipedia.org/wiki/Region-based_memory_management)
//! tree. Nodes are appended in any order as long as the parent exists; depth-first
//! traversal follows child references and is therefore slower than the one of
//! [DepthFirstArenaTree].

use super::DepthFirstArenaTree;
use crate::MarionetteError;
use std::{collections::HashMap, fmt::Debug, hash::Hash};

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct ArenaIndex(pub usize);

/// A node structure to be used in an arena allocated tree. Fields are used to speed up iteration
#[derive(Debug, Clone)]
pub struct ArenaNode<Load, NodeId> {
    /// The user-defined load that the node owns
    pub(super) load: Load,
    /// Index in the arena allocation
    pub(super) index: ArenaIndex,
    /// identifier for lookups
    pub(super) id: NodeId,
    /// references for children
    pub(super) children: Vec<ArenaIndex>,
    /// Size of the sub-tree including the node itself
    pub(super) width: usize,
    pub(super) depth: usize,
    pub(super) parent_ref: Option<ArenaIndex>,
}

impl<Load, NodeId> ArenaNode<Load, NodeId> {
    fn new(load: Load, id: NodeId, index: ArenaIndex, depth: usize, parent_ref: Option<ArenaIndex>) -> Self {
        ArenaNode {
            load,
            index,
            id,
            children: vec![],
            width: 1,
            depth,
            parent_ref,
        }
    }

    pub fn get(&self) -> &Load {
        &self.load
    }

    pub fn get_mut(&mut self) -> &mut Load {
        &mut self.load
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn index(&self) -> ArenaIndex {
        self.index
    }

    pub fn parent(&self) -> Option<ArenaIndex> {
        self.parent_ref
    }

    pub fn children(&self) -> &[ArenaIndex] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Mutable tree in insertion order. Convert into a [DepthFirstArenaTree] with `into()` once
/// all nodes are added.
#[derive(Debug, Clone)]
pub struct DirectedArenaTree<Load, NodeId> {
    pub(super) nodes: Vec<ArenaNode<Load, NodeId>>,
    pub(super) lookup: HashMap<NodeId, ArenaIndex>,
}

impl<Load, NodeId> Default for DirectedArenaTree<Load, NodeId> {
    fn default() -> Self {
        DirectedArenaTree {
            nodes: vec![],
            lookup: HashMap::new(),
        }
    }
}

impl<Load, NodeId> DirectedArenaTree<Load, NodeId>
where
    NodeId: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the tree and sets the root node
    pub fn set_root(&mut self, load: Load, id: NodeId) -> NodeId {
        self.nodes.clear();
        self.lookup.clear();
        self.lookup.insert(id.clone(), ArenaIndex(0));
        self.nodes.push(ArenaNode::new(load, id.clone(), ArenaIndex(0), 0, None));
        id
    }

    pub fn add(&mut self, load: Load, id: NodeId, parent: &NodeId) -> Result<NodeId, MarionetteError> {
        let parent_index = *self
            .lookup
            .get(parent)
            .ok_or_else(|| MarionetteError::structural(format!("{:?}", parent), "unknown parent node"))?;
        // check before touching the parent
        if self.lookup.contains_key(&id) {
            return Err(MarionetteError::NameCollision(format!("{:?}", id)));
        }
        let index = ArenaIndex(self.nodes.len());
        let depth = self.nodes[parent_index.0].depth + 1;
        self.nodes[parent_index.0].children.push(index);

        // widths of all ancestors grow by one
        let mut current = Some(parent_index);
        while let Some(ancestor) = current {
            let node = &mut self.nodes[ancestor.0];
            node.width += 1;
            current = node.parent_ref;
        }

        self.lookup.insert(id.clone(), index);
        self.nodes.push(ArenaNode::new(load, id.clone(), index, depth, Some(parent_index)));
        Ok(id)
    }

    pub fn node_by_id(&self, id: &NodeId) -> Option<&ArenaNode<Load, NodeId>> {
        self.nodes.get(self.lookup.get(id)?.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first traversal following child references (slow path)
    pub fn iter_depth(&self) -> impl Iterator<Item = &ArenaNode<Load, NodeId>> {
        let mut stack = if self.nodes.is_empty() { vec![] } else { vec![ArenaIndex(0)] };
        std::iter::from_fn(move || {
            let index = stack.pop()?;
            let node = &self.nodes[index.0];
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn depth_first(self) -> DepthFirstArenaTree<Load, NodeId> {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test_log::test]
    fn test_add_and_widths() {
        //     a
        //    / \
        //   b   c
        //   |
        //   d
        let mut tree = DirectedArenaTree::<u8, &str>::new();
        let root = tree.set_root(0, "a");
        tree.add(1, "b", &root).unwrap();
        tree.add(2, "c", &root).unwrap();
        tree.add(3, "d", &"b").unwrap();

        assert_eq!(tree.nodes.iter().map(|n| n.width).collect_vec(), &[4, 2, 1, 1]);
        assert_eq!(tree.node_by_id(&"d").unwrap().depth(), 2);
        assert_eq!(tree.iter_depth().map(|n| *n.id()).collect_vec(), &["a", "b", "d", "c"]);

        assert!(matches!(tree.add(4, "d", &"c"), Err(MarionetteError::NameCollision(_))));
        assert!(matches!(tree.add(4, "e", &"x"), Err(MarionetteError::Structural { .. })));
    }
}
