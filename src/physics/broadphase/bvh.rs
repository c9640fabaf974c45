//! Dynamic bounding volume hierarchy.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. A node is
//! either a leaf carrying one proxy or a branch with exactly two children,
//! never both. A branch's box is always the exact merge of its children's
//! boxes; a leaf's box is the proxy's AABB padded by the margin at the time
//! it was (re)inserted.
//!
//! The padding is what makes the tree cheap to maintain: an object can move
//! anywhere inside its padded box without touching the tree. Only when its
//! live AABB escapes the padded box does [`Bvh::update`] detach the leaf and
//! reinsert it from the root.

use std::collections::HashMap;

use crate::error::{PhysicsError, Result};
use crate::physics::aabb::Aabb;

use super::{BroadPhase, CollisionPair, ProxyId};

/// Leaf padding used by [`Bvh::new`].
pub const DEFAULT_MARGIN: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Leaf { proxy: ProxyId, live: Aabb },
    Branch([NodeId; 2]),
}

#[derive(Debug, Clone)]
struct Node {
    aabb: Aabb,
    parent: Option<NodeId>,
    kind: NodeKind,
    /// Set once this branch's two subtrees have been tested against each
    /// other during the current pair pass.
    children_crossed: bool,
}

/// Dynamic AABB tree broad phase.
#[derive(Debug)]
pub struct Bvh {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    leaves: HashMap<ProxyId, NodeId>,
    margin: f32,
    checks: usize,
    reinsertions: usize,
}

impl Default for Bvh {
    fn default() -> Self {
        Self::new()
    }
}

impl Bvh {
    pub fn new() -> Self {
        Self::with_margin(DEFAULT_MARGIN)
    }

    pub fn with_margin(margin: f32) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            leaves: HashMap::new(),
            margin: margin.max(0.0),
            checks: 0,
            reinsertions: 0,
        }
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Leaves reinserted by the last [`BroadPhase::update`].
    pub fn last_reinsertions(&self) -> usize {
        self.reinsertions
    }

    /// Longest root-to-leaf path (0 for an empty tree, 1 for a lone leaf).
    pub fn depth(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut deepest = 0;
        let mut stack = vec![(root, 1)];
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let NodeKind::Branch([left, right]) = self.node(id).kind {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        deepest
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                *self.node_mut(id) = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(node);
                id
            }
        }
    }

    fn children(&self, id: NodeId) -> [NodeId; 2] {
        match self.node(id).kind {
            NodeKind::Branch(children) => children,
            NodeKind::Leaf { proxy, .. } => {
                panic!("BVH node {id:?} holding {proxy:?} was expected to be a branch")
            }
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let mut children = self.children(parent);
        match children.iter().position(|c| *c == old) {
            Some(slot) => children[slot] = new,
            None => panic!("BVH node {old:?} is not a child of {parent:?}"),
        }
        self.node_mut(parent).kind = NodeKind::Branch(children);
    }

    /// Recompute branch boxes from `start` up to the root.
    fn refit_from(&mut self, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            let [left, right] = self.children(id);
            let merged = Aabb::merge(&self.node(left).aabb, &self.node(right).aabb);
            let node = self.node_mut(id);
            node.aabb = merged;
            current = node.parent;
        }
    }

    /// Hang a detached leaf into the tree, descending greedily by volume growth.
    fn insert_leaf(&mut self, leaf: NodeId) {
        let Some(root) = self.root else {
            self.node_mut(leaf).parent = None;
            self.root = Some(leaf);
            return;
        };

        let leaf_aabb = self.node(leaf).aabb;
        let mut target = root;
        while let NodeKind::Branch([left, right]) = self.node(target).kind {
            let left_aabb = self.node(left).aabb;
            let right_aabb = self.node(right).aabb;
            let grow_left = Aabb::merge(&left_aabb, &leaf_aabb).volume() - left_aabb.volume();
            let grow_right = Aabb::merge(&right_aabb, &leaf_aabb).volume() - right_aabb.volume();
            // Ties go left.
            target = if grow_right < grow_left { right } else { left };
        }

        // `target` is a leaf: replace it with a branch holding both leaves.
        let old_parent = self.node(target).parent;
        let branch = self.allocate(Node {
            aabb: Aabb::merge(&self.node(target).aabb, &leaf_aabb),
            parent: old_parent,
            kind: NodeKind::Branch([target, leaf]),
            children_crossed: false,
        });
        self.node_mut(target).parent = Some(branch);
        self.node_mut(leaf).parent = Some(branch);

        match old_parent {
            None => self.root = Some(branch),
            Some(parent) => {
                self.replace_child(parent, target, branch);
                self.refit_from(Some(parent));
            }
        }
    }

    /// Unlink a leaf, promoting its sibling into the grandparent's slot and
    /// freeing the parent. The leaf node itself stays allocated.
    fn detach_leaf(&mut self, leaf: NodeId) {
        let Some(parent) = self.node(leaf).parent else {
            self.root = None;
            return;
        };

        let [left, right] = self.children(parent);
        let sibling = if left == leaf { right } else { left };
        let grandparent = self.node(parent).parent;
        self.node_mut(sibling).parent = grandparent;

        match grandparent {
            None => self.root = Some(sibling),
            Some(grandparent) => {
                self.replace_child(grandparent, parent, sibling);
                self.refit_from(Some(grandparent));
            }
        }

        self.free.push(parent);
        self.node_mut(leaf).parent = None;
    }

    /// Leaves whose live AABB escaped their padded box.
    fn collect_invalid(&self, root: NodeId) -> Vec<NodeId> {
        let mut invalid = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            match node.kind {
                NodeKind::Leaf { live, .. } => {
                    if !node.aabb.contains(&live) {
                        invalid.push(id);
                    }
                }
                NodeKind::Branch([left, right]) => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        invalid
    }

    fn clear_crossed_flags(&mut self) {
        for node in &mut self.nodes {
            node.children_crossed = false;
        }
    }

    fn cross_children(&mut self, id: NodeId, pairs: &mut Vec<CollisionPair>) {
        let Node {
            kind,
            children_crossed,
            ..
        } = *self.node(id);
        if children_crossed {
            return;
        }
        if let NodeKind::Branch([left, right]) = kind {
            self.node_mut(id).children_crossed = true;
            self.compute_pairs(left, right, pairs);
        }
    }

    fn compute_pairs(&mut self, n0: NodeId, n1: NodeId, pairs: &mut Vec<CollisionPair>) {
        let overlap = self.node(n0).aabb.collides(&self.node(n1).aabb);
        match (self.node(n0).kind, self.node(n1).kind) {
            (
                NodeKind::Leaf {
                    proxy: a,
                    live: live_a,
                },
                NodeKind::Leaf {
                    proxy: b,
                    live: live_b,
                },
            ) => {
                self.checks += 1;
                if live_a.collides(&live_b) {
                    pairs.push(CollisionPair::new(a, b));
                }
            }
            (NodeKind::Leaf { .. }, NodeKind::Branch([c0, c1])) => {
                self.cross_children(n1, pairs);
                if overlap {
                    self.compute_pairs(n0, c0, pairs);
                    self.compute_pairs(n0, c1, pairs);
                }
            }
            (NodeKind::Branch([c0, c1]), NodeKind::Leaf { .. }) => {
                self.cross_children(n0, pairs);
                if overlap {
                    self.compute_pairs(c0, n1, pairs);
                    self.compute_pairs(c1, n1, pairs);
                }
            }
            (NodeKind::Branch([a0, a1]), NodeKind::Branch([b0, b1])) => {
                self.cross_children(n0, pairs);
                self.cross_children(n1, pairs);
                if overlap {
                    self.compute_pairs(a0, b0, pairs);
                    self.compute_pairs(a0, b1, pairs);
                    self.compute_pairs(a1, b0, pairs);
                    self.compute_pairs(a1, b1, pairs);
                }
            }
        }
    }

    /// Check the structural invariants. Used by tests.
    #[cfg(test)]
    fn validate(&self) {
        let Some(root) = self.root else {
            assert!(self.leaves.is_empty());
            return;
        };
        assert!(self.node(root).parent.is_none());
        let mut leaf_count = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            match node.kind {
                NodeKind::Leaf { proxy, .. } => {
                    leaf_count += 1;
                    assert_eq!(self.leaves.get(&proxy), Some(&id));
                }
                NodeKind::Branch([left, right]) => {
                    assert_eq!(self.node(left).parent, Some(id));
                    assert_eq!(self.node(right).parent, Some(id));
                    let merged = Aabb::merge(&self.node(left).aabb, &self.node(right).aabb);
                    assert_eq!(node.aabb, merged, "branch box must equal its children's merge");
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        assert_eq!(leaf_count, self.leaves.len());
    }
}

impl BroadPhase for Bvh {
    fn add(&mut self, id: ProxyId, aabb: Aabb) {
        if self.leaves.contains_key(&id) {
            // Re-adding replaces the live box; the next update refits if needed.
            let _ = self.set_aabb(id, aabb);
            return;
        }

        let leaf = self.allocate(Node {
            aabb: aabb.expanded(self.margin),
            parent: None,
            kind: NodeKind::Leaf {
                proxy: id,
                live: aabb,
            },
            children_crossed: false,
        });
        self.leaves.insert(id, leaf);
        self.insert_leaf(leaf);
    }

    fn remove(&mut self, id: ProxyId) -> Result<()> {
        let leaf = self
            .leaves
            .remove(&id)
            .ok_or(PhysicsError::UnknownProxy(id))?;
        self.detach_leaf(leaf);
        self.free.push(leaf);
        Ok(())
    }

    fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> Result<()> {
        let leaf = *self.leaves.get(&id).ok_or(PhysicsError::UnknownProxy(id))?;
        match &mut self.node_mut(leaf).kind {
            NodeKind::Leaf { live, .. } => *live = aabb,
            NodeKind::Branch(_) => panic!("BVH proxy {id:?} maps to branch node {leaf:?}"),
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.leaves.clear();
        self.root = None;
        self.checks = 0;
        self.reinsertions = 0;
    }

    fn update(&mut self) {
        self.reinsertions = 0;
        let Some(root) = self.root else {
            return;
        };

        if let NodeKind::Leaf { live, .. } = self.node(root).kind {
            self.node_mut(root).aabb = live.expanded(self.margin);
            return;
        }

        let invalid = self.collect_invalid(root);
        for leaf in &invalid {
            let live = match self.node(*leaf).kind {
                NodeKind::Leaf { live, .. } => live,
                NodeKind::Branch(_) => unreachable!("collect_invalid only returns leaves"),
            };
            self.detach_leaf(*leaf);
            self.node_mut(*leaf).aabb = live.expanded(self.margin);
            self.insert_leaf(*leaf);
        }

        self.reinsertions = invalid.len();
        if !invalid.is_empty() {
            tracing::trace!(reinserted = invalid.len(), "bvh leaves reinserted");
        }
    }

    /// Requires [`BroadPhase::update`] after the last `set_aabb`, so that
    /// padded boxes enclose the live ones.
    fn calculate_pairs(&mut self) -> Vec<CollisionPair> {
        self.checks = 0;
        let mut pairs = Vec::new();
        let Some(root) = self.root else {
            return pairs;
        };

        self.clear_crossed_flags();
        if let NodeKind::Branch([left, right]) = self.node(root).kind {
            self.compute_pairs(left, right, &mut pairs);
        }

        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    fn checks_made(&self) -> usize {
        self.checks
    }

    fn len(&self) -> usize {
        self.leaves.len()
    }

    fn debug_bounds(&self) -> Vec<Aabb> {
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            out.push(node.aabb);
            if let NodeKind::Branch([left, right]) = node.kind {
                stack.push(left);
                stack.push(right);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{exact_pairs, random_scene};
    use super::*;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cube(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn test_single_leaf_is_root() {
        let mut bvh = Bvh::new();
        bvh.add(ProxyId(0), cube(Vec3::ZERO));
        bvh.validate();
        assert_eq!(bvh.depth(), 1);
        assert!(bvh.calculate_pairs().is_empty());
    }

    #[test]
    fn test_leaves_are_padded_by_margin() {
        let mut bvh = Bvh::with_margin(0.25);
        bvh.add(ProxyId(0), cube(Vec3::ZERO));
        bvh.add(ProxyId(1), cube(Vec3::new(5.0, 0.0, 0.0)));
        let root = bvh.root.unwrap();
        let expected = Aabb::merge(
            &cube(Vec3::ZERO).expanded(0.25),
            &cube(Vec3::new(5.0, 0.0, 0.0)).expanded(0.25),
        );
        assert_eq!(bvh.node(root).aabb, expected);
    }

    #[test]
    fn test_remove_promotes_sibling() {
        let mut bvh = Bvh::new();
        bvh.add(ProxyId(0), cube(Vec3::ZERO));
        bvh.add(ProxyId(1), cube(Vec3::new(3.0, 0.0, 0.0)));
        bvh.add(ProxyId(2), cube(Vec3::new(6.0, 0.0, 0.0)));
        bvh.validate();

        bvh.remove(ProxyId(1)).unwrap();
        bvh.validate();
        assert_eq!(bvh.len(), 2);
        assert_eq!(bvh.depth(), 2);

        bvh.remove(ProxyId(0)).unwrap();
        bvh.validate();
        assert_eq!(bvh.depth(), 1);

        bvh.remove(ProxyId(2)).unwrap();
        bvh.validate();
        assert_eq!(bvh.depth(), 0);
    }

    #[test]
    fn test_small_motion_inside_margin_skips_reinsertion() {
        let mut bvh = Bvh::new();
        for i in 0..8 {
            bvh.add(ProxyId(i), cube(Vec3::new(i as f32 * 3.0, 0.0, 0.0)));
        }
        bvh.set_aabb(ProxyId(3), cube(Vec3::new(9.3, 0.2, 0.0))).unwrap();
        bvh.update();
        assert_eq!(bvh.last_reinsertions(), 0);

        bvh.set_aabb(ProxyId(3), cube(Vec3::new(9.0, 4.0, 0.0))).unwrap();
        bvh.update();
        assert_eq!(bvh.last_reinsertions(), 1);
        bvh.validate();
    }

    #[test]
    fn test_invariants_hold_under_random_edits() {
        let mut rng = StdRng::seed_from_u64(2024);
        let mut bvh = Bvh::new();
        let mut scene = random_scene(5, 60, 15.0);
        for (id, aabb) in &scene {
            bvh.add(*id, *aabb);
        }
        bvh.validate();

        for step in 0..50 {
            for (_, aabb) in scene.iter_mut() {
                let delta = Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                aabb.min += delta;
                aabb.max += delta;
            }
            if step % 7 == 0 && !scene.is_empty() {
                let index = rng.gen_range(0..scene.len());
                let (id, _) = scene.swap_remove(index);
                bvh.remove(id).unwrap();
            }
            if step % 5 == 0 {
                let id = ProxyId(1000 + step);
                let aabb = cube(Vec3::new(rng.gen_range(-10.0..10.0), 0.0, 0.0));
                scene.push((id, aabb));
                bvh.add(id, aabb);
            }
            for (id, aabb) in &scene {
                bvh.set_aabb(*id, *aabb).unwrap();
            }
            bvh.update();
            bvh.validate();

            // Every padded leaf encloses its live box after an update.
            for (id, aabb) in &scene {
                let leaf = bvh.leaves[id];
                assert!(bvh.node(leaf).aabb.contains(aabb));
            }

            let mut sorted = scene.clone();
            sorted.sort_by_key(|(id, _)| *id);
            assert_eq!(bvh.calculate_pairs(), exact_pairs(&sorted));
        }
    }

    #[test]
    fn test_pruning_reduces_checks() {
        let mut bvh = Bvh::new();
        let scene = random_scene(77, 200, 60.0);
        for (id, aabb) in &scene {
            bvh.add(*id, *aabb);
        }
        bvh.update();
        bvh.calculate_pairs();
        let all_pairs = 200 * 199 / 2;
        assert!(bvh.checks_made() < all_pairs / 4, "checks = {}", bvh.checks_made());
    }
}
