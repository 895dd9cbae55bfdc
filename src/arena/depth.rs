//! Arena tree whose storage is sorted in depth-first order.
//!
//! Iterating the arena front to back visits every parent before its children; iterating it
//! back to front visits every child before its parent. Both directions are plain slice
//! iteration, which is what the forward and backward recursions of the generators need.

use super::{
    utils::{invert, sort_by_indices},
    ArenaIndex, ArenaNode, DirectedArenaTree,
};
use itertools::Itertools;
use std::{fmt::Debug, hash::Hash};

#[derive(Debug, Clone)]
pub struct DepthFirstArenaTree<Load, NodeId>(DirectedArenaTree<Load, NodeId>);

impl<Load, NodeId> From<DirectedArenaTree<Load, NodeId>> for DepthFirstArenaTree<Load, NodeId>
where
    NodeId: Eq + Hash + Clone + Debug,
{
    fn from(mut value: DirectedArenaTree<Load, NodeId>) -> Self {
        let optimal_order = value.iter_depth().map(|node| node.index).collect_vec();
        let new_index = invert(&optimal_order);

        value.nodes.iter_mut().for_each(|node| {
            node.index = new_index[node.index.0];
            node.parent_ref = node.parent_ref.map(|parent| new_index[parent.0]);
            node.children.iter_mut().for_each(|child| *child = new_index[child.0]);
        });
        sort_by_indices(&mut value.nodes, optimal_order);

        value.lookup = value.nodes.iter().map(|node| (node.id.clone(), node.index)).collect();
        Self(value)
    }
}

impl<Load, NodeId> DepthFirstArenaTree<Load, NodeId>
where
    NodeId: Eq + Hash + Clone + Debug,
{
    pub fn root(&self) -> Option<&ArenaNode<Load, NodeId>> {
        self.0.nodes.first()
    }

    pub fn nodes(&self) -> &[ArenaNode<Load, NodeId>] {
        &self.0.nodes
    }

    pub fn len(&self) -> usize {
        self.0.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.nodes.is_empty()
    }

    pub fn get(&self, index: ArenaIndex) -> Option<&ArenaNode<Load, NodeId>> {
        self.0.nodes.get(index.0)
    }

    pub fn node_by_id(&self, id: &NodeId) -> Option<&ArenaNode<Load, NodeId>> {
        self.0.node_by_id(id)
    }

    pub fn node_by_id_mut(&mut self, id: &NodeId) -> Option<&mut ArenaNode<Load, NodeId>> {
        let index = self.0.lookup.get(id)?;
        self.0.nodes.get_mut(index.0)
    }

    /// Parents before children
    pub fn iter(&self) -> std::slice::Iter<'_, ArenaNode<Load, NodeId>> {
        self.0.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ArenaNode<Load, NodeId>> {
        self.0.nodes.iter_mut()
    }

    /// The sub-tree rooted at `root`, root included
    pub fn iter_sub(&self, root: &ArenaNode<Load, NodeId>) -> std::slice::Iter<'_, ArenaNode<Load, NodeId>> {
        let (start, width) = (root.index.0, root.width);
        self.0.nodes[start..start + width].iter()
    }

    pub fn parent(&self, node: &ArenaNode<Load, NodeId>) -> Option<&ArenaNode<Load, NodeId>> {
        self.get(node.parent_ref?)
    }

    pub fn children<'a>(&'a self, node: &'a ArenaNode<Load, NodeId>) -> impl Iterator<Item = &'a ArenaNode<Load, NodeId>> {
        node.children.iter().filter_map(move |child| self.get(*child))
    }

    /// The node followed by all its ancestors up to the root
    pub fn ancestors<'a>(&'a self, node: &'a ArenaNode<Load, NodeId>) -> impl Iterator<Item = &'a ArenaNode<Load, NodeId>> {
        std::iter::successors(Some(node), move |n| self.parent(n))
    }

    /// Whether `descendant` lies in the sub-tree of `ancestor` (a node is its own descendant)
    pub fn is_descendant(&self, descendant: &ArenaNode<Load, NodeId>, ancestor: &ArenaNode<Load, NodeId>) -> bool {
        let start = ancestor.index.0;
        (start..start + ancestor.width).contains(&descendant.index.0)
    }
}
