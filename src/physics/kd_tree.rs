//! K-D tree over point positions, used for nearest-body queries.
//!
//! The tree holds `(item, position)` snapshots. Positions are not tracked
//! live: callers re-insert moved items or rebuild the whole tree from fresh
//! positions. Incremental inserts and removes unbalance the tree over time,
//! so it is rebuilt from scratch every `rebuild_threshold` mutations.

use std::collections::HashMap;
use std::hash::Hash;

use glam::Vec3;

use super::aabb::Aabb;

/// Tuning for [`KdTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdTreeConfig {
    /// Mutations (insert or remove) between full rebuilds. Default: 10.
    pub rebuild_threshold: usize,
    /// Largest bucket a leaf holds when built. Default: 4.
    pub leaf_size: usize,
    /// Depth at which construction stops splitting. Default: 16.
    pub max_depth: usize,
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            rebuild_threshold: 10,
            leaf_size: 4,
            max_depth: 16,
        }
    }
}

#[derive(Debug)]
enum KdNode<T> {
    Interior {
        axis: usize,
        split: f32,
        left: Box<KdNode<T>>,
        right: Box<KdNode<T>>,
    },
    Leaf {
        items: Vec<(T, Vec3)>,
        /// Bounds of the bucket, for debug drawing.
        bounds: Option<Aabb>,
    },
}

impl<T: Copy + Eq> KdNode<T> {
    fn leaf(items: Vec<(T, Vec3)>) -> Self {
        let bounds = bucket_bounds(&items);
        KdNode::Leaf { items, bounds }
    }

    /// Recursive median split. `depth` counts down; at 0 the node is a leaf.
    fn build(mut items: Vec<(T, Vec3)>, depth: usize, leaf_size: usize) -> Self {
        if depth == 0 || items.len() <= leaf_size.max(1) {
            return Self::leaf(items);
        }

        let axis = depth % 3;
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| a.1[axis].total_cmp(&b.1[axis]));
        let split = items[mid].1[axis];
        let right = items.split_off(mid);

        KdNode::Interior {
            axis,
            split,
            left: Box::new(Self::build(items, depth - 1, leaf_size)),
            right: Box::new(Self::build(right, depth - 1, leaf_size)),
        }
    }

    fn insert(&mut self, item: T, position: Vec3) {
        match self {
            KdNode::Interior {
                axis,
                split,
                left,
                right,
            } => {
                if position[*axis] < *split {
                    left.insert(item, position);
                } else {
                    right.insert(item, position);
                }
            }
            KdNode::Leaf { items, bounds } => {
                items.push((item, position));
                let point = Aabb::new(position, position);
                let merged = match *bounds {
                    Some(b) => Aabb::merge(&b, &point),
                    None => point,
                };
                *bounds = Some(merged);
            }
        }
    }

    fn remove(&mut self, item: T, position: Vec3) -> bool {
        match self {
            KdNode::Interior {
                axis,
                split,
                left,
                right,
            } => {
                let value = position[*axis];
                if value < *split {
                    left.remove(item, position)
                } else if value > *split {
                    right.remove(item, position)
                } else {
                    left.remove(item, position) || right.remove(item, position)
                }
            }
            KdNode::Leaf { items, bounds } => {
                let Some(index) = items.iter().position(|(i, _)| *i == item) else {
                    return false;
                };
                items.swap_remove(index);
                *bounds = bucket_bounds(items);
                true
            }
        }
    }

    fn nearest<F>(&self, point: Vec3, filter: &F, best: &mut Option<(T, f32)>)
    where
        F: Fn(&T) -> bool,
    {
        match self {
            KdNode::Leaf { items, .. } => {
                for (item, position) in items {
                    if !filter(item) {
                        continue;
                    }
                    let d2 = position.distance_squared(point);
                    if best.map_or(true, |(_, b)| d2 < b) {
                        *best = Some((*item, d2));
                    }
                }
            }
            KdNode::Interior {
                axis,
                split,
                left,
                right,
            } => {
                let diff = point[*axis] - *split;
                let (near, far) = if diff < 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };
                near.nearest(point, filter, best);
                // The far side can only help if the splitting plane is closer
                // than the best match so far.
                if best.map_or(true, |(_, b)| diff * diff <= b) {
                    far.nearest(point, filter, best);
                }
            }
        }
    }

    fn within(&self, point: Vec3, radius: f32, out: &mut Vec<T>) {
        match self {
            KdNode::Leaf { items, .. } => {
                let r2 = radius * radius;
                out.extend(
                    items
                        .iter()
                        .filter(|(_, p)| p.distance_squared(point) <= r2)
                        .map(|(i, _)| *i),
                );
            }
            KdNode::Interior {
                axis,
                split,
                left,
                right,
            } => {
                if point[*axis] - radius <= *split {
                    left.within(point, radius, out);
                }
                if point[*axis] + radius >= *split {
                    right.within(point, radius, out);
                }
            }
        }
    }

    fn collect_bounds(&self, out: &mut Vec<Aabb>) {
        match self {
            KdNode::Leaf { bounds, .. } => out.extend(bounds.iter().copied()),
            KdNode::Interior { left, right, .. } => {
                left.collect_bounds(out);
                right.collect_bounds(out);
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            KdNode::Leaf { .. } => 1,
            KdNode::Interior { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

fn bucket_bounds<T>(items: &[(T, Vec3)]) -> Option<Aabb> {
    let points: Vec<Vec3> = items.iter().map(|(_, p)| *p).collect();
    Aabb::from_points(&points)
}

/// Point K-D tree keyed by item.
#[derive(Debug)]
pub struct KdTree<T> {
    config: KdTreeConfig,
    root: Option<KdNode<T>>,
    positions: HashMap<T, Vec3>,
    mutations: usize,
    rebuilds: usize,
}

impl<T> KdTree<T>
where
    T: Copy + Eq + Hash + std::fmt::Debug,
{
    pub fn new(config: KdTreeConfig) -> Self {
        Self {
            config,
            root: None,
            positions: HashMap::new(),
            mutations: 0,
            rebuilds: 0,
        }
    }

    /// Build a balanced tree over the given snapshots.
    pub fn build<I>(config: KdTreeConfig, items: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec3)>,
    {
        let mut tree = Self::new(config);
        tree.rebuild_from(items);
        tree
    }

    pub fn config(&self) -> &KdTreeConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.positions.contains_key(item)
    }

    /// Position the item was last inserted with.
    pub fn position(&self, item: &T) -> Option<Vec3> {
        self.positions.get(item).copied()
    }

    /// Mutations since the last rebuild.
    pub fn pending_mutations(&self) -> usize {
        self.mutations
    }

    /// Full rebuilds performed so far.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Number of levels, 0 when empty.
    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, KdNode::depth)
    }

    /// Insert an item, or move it if it is already present.
    pub fn insert(&mut self, item: T, position: Vec3) {
        if let Some(old) = self.positions.insert(item, position) {
            if let Some(root) = self.root.as_mut() {
                root.remove(item, old);
            }
        }
        match self.root.as_mut() {
            Some(root) => root.insert(item, position),
            None => self.root = Some(KdNode::leaf(vec![(item, position)])),
        }
        self.record_mutation();
    }

    /// Remove an item. Returns false if it was not present.
    pub fn remove(&mut self, item: &T) -> bool {
        let Some(position) = self.positions.remove(item) else {
            return false;
        };
        let removed = self
            .root
            .as_mut()
            .map_or(false, |root| root.remove(*item, position));
        debug_assert!(removed, "kd tree lost track of {item:?}");
        self.record_mutation();
        true
    }

    fn record_mutation(&mut self) {
        self.mutations += 1;
        if self.mutations >= self.config.rebuild_threshold {
            self.rebuild();
        }
    }

    /// Discard the tree and rebuild it from the stored snapshots.
    pub fn rebuild(&mut self) {
        let items: Vec<(T, Vec3)> = self.positions.iter().map(|(i, p)| (*i, *p)).collect();
        self.root = if items.is_empty() {
            None
        } else {
            Some(KdNode::build(
                items,
                self.config.max_depth,
                self.config.leaf_size,
            ))
        };
        self.mutations = 0;
        self.rebuilds += 1;
        tracing::trace!(items = self.positions.len(), depth = self.depth(), "kd tree rebuilt");
    }

    /// Replace every snapshot and rebuild.
    pub fn rebuild_from<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (T, Vec3)>,
    {
        self.positions = items.into_iter().collect();
        self.rebuild();
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.root = None;
        self.mutations = 0;
    }

    /// Closest item to `point` and its distance.
    pub fn nearest_neighbour(&self, point: Vec3) -> Option<(T, f32)> {
        self.nearest_neighbour_filtered(point, |_| true)
    }

    /// Closest item accepted by `filter`, e.g. to exclude the querying body.
    pub fn nearest_neighbour_filtered<F>(&self, point: Vec3, filter: F) -> Option<(T, f32)>
    where
        F: Fn(&T) -> bool,
    {
        let root = self.root.as_ref()?;
        let mut best = None;
        root.nearest(point, &filter, &mut best);
        best.map(|(item, d2)| (item, d2.sqrt()))
    }

    /// Every item within `radius` of `point` (inclusive), in no particular order.
    pub fn within_radius(&self, point: Vec3, radius: f32) -> Vec<T> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.within(point, radius, &mut out);
        }
        out
    }

    /// Bounds of each non-empty leaf bucket.
    pub fn leaf_bounds(&self) -> Vec<Aabb> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_bounds(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(seed: u64, count: u32) -> Vec<(u32, Vec3)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                (
                    i,
                    Vec3::new(
                        rng.gen_range(-50.0..50.0),
                        rng.gen_range(-50.0..50.0),
                        rng.gen_range(-50.0..50.0),
                    ),
                )
            })
            .collect()
    }

    fn brute_nearest(points: &[(u32, Vec3)], query: Vec3) -> (u32, f32) {
        points
            .iter()
            .map(|(i, p)| (*i, p.distance(query)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree: KdTree<u32> = KdTree::new(KdTreeConfig::default());
        assert!(tree.is_empty());
        assert_eq!(tree.depth(), 0);
        assert!(tree.nearest_neighbour(Vec3::ZERO).is_none());
        assert!(tree.within_radius(Vec3::ZERO, 100.0).is_empty());
    }

    #[test]
    fn test_nearest_matches_linear_scan() {
        let points = random_points(21, 300);
        let tree = KdTree::build(KdTreeConfig::default(), points.iter().copied());
        let mut rng = StdRng::seed_from_u64(22);

        for _ in 0..200 {
            let query = Vec3::new(
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
            );
            let (item, distance) = tree.nearest_neighbour(query).unwrap();
            let (expected_item, expected_distance) = brute_nearest(&points, query);
            assert!((distance - expected_distance).abs() < 1e-4);
            assert_eq!(item, expected_item);
        }
    }

    #[test]
    fn test_nearest_after_incremental_edits() {
        let mut points = random_points(5, 64);
        let mut tree = KdTree::build(KdTreeConfig::default(), points.iter().copied());
        let mut rng = StdRng::seed_from_u64(6);

        for step in 0..37u32 {
            if step % 3 == 0 {
                let (id, _) = points.swap_remove(rng.gen_range(0..points.len()));
                assert!(tree.remove(&id));
            } else {
                let id = 1000 + step;
                let p = Vec3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                );
                points.push((id, p));
                tree.insert(id, p);
            }
            let query = Vec3::new(rng.gen_range(-50.0..50.0), 0.0, 0.0);
            let (item, _) = tree.nearest_neighbour(query).unwrap();
            assert_eq!(item, brute_nearest(&points, query).0);
        }
        assert_eq!(tree.len(), points.len());
    }

    #[test]
    fn test_rebuilds_every_ten_mutations() {
        let mut tree = KdTree::new(KdTreeConfig::default());
        for i in 0..9u32 {
            tree.insert(i, Vec3::splat(i as f32));
        }
        assert_eq!(tree.rebuilds(), 0);
        assert_eq!(tree.pending_mutations(), 9);

        tree.insert(9, Vec3::splat(9.0));
        assert_eq!(tree.rebuilds(), 1);
        assert_eq!(tree.pending_mutations(), 0);

        for i in 0..10u32 {
            tree.remove(&i);
        }
        assert_eq!(tree.rebuilds(), 2);
        assert!(tree.is_empty());
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut tree = KdTree::build(KdTreeConfig::default(), random_points(1, 8));
        assert!(!tree.remove(&999));
        assert_eq!(tree.pending_mutations(), 0);
        assert_eq!(tree.len(), 8);
    }

    #[test]
    fn test_insert_existing_moves_item() {
        let mut tree = KdTree::build(KdTreeConfig::default(), random_points(2, 20));
        tree.insert(3, Vec3::new(500.0, 500.0, 500.0));
        assert_eq!(tree.len(), 20);
        let (item, distance) = tree.nearest_neighbour(Vec3::splat(499.0)).unwrap();
        assert_eq!(item, 3);
        assert!((distance - 3f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_filtered_excludes_self() {
        let points = random_points(3, 50);
        let tree = KdTree::build(KdTreeConfig::default(), points.iter().copied());
        let (me, at) = points[10];
        let (item, distance) = tree.nearest_neighbour_filtered(at, |i| *i != me).unwrap();
        assert_ne!(item, me);
        assert!(distance > 0.0);

        let others: Vec<_> = points.iter().copied().filter(|(i, _)| *i != me).collect();
        assert_eq!(item, brute_nearest(&others, at).0);
    }

    #[test]
    fn test_within_radius_matches_linear_scan() {
        let points = random_points(8, 200);
        let tree = KdTree::build(KdTreeConfig::default(), points.iter().copied());
        let query = Vec3::new(5.0, -3.0, 10.0);
        let radius = 25.0;

        let mut found = tree.within_radius(query, radius);
        found.sort_unstable();
        let mut expected: Vec<u32> = points
            .iter()
            .filter(|(_, p)| p.distance(query) <= radius)
            .map(|(i, _)| *i)
            .collect();
        expected.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_build_respects_leaf_size() {
        let tree = KdTree::build(KdTreeConfig::default(), random_points(4, 100));
        let bounds = tree.leaf_bounds();
        // 100 points in buckets of at most 4.
        assert!(bounds.len() >= 25);
        assert!(tree.depth() <= KdTreeConfig::default().max_depth + 1);
    }

    #[test]
    fn test_duplicate_positions() {
        let mut tree = KdTree::new(KdTreeConfig::default());
        for i in 0..6u32 {
            tree.insert(i, Vec3::ONE);
        }
        tree.rebuild();
        for i in 0..6u32 {
            assert!(tree.remove(&i));
        }
        assert!(tree.is_empty());
    }
}
