//! Broad-phase collision detection.
//!
//! Three interchangeable strategies sit behind the [`BroadPhase`] trait:
//!
//! - [`BruteForce`]: all-pairs `O(n^2)` scan, the reference oracle
//! - [`Bvh`]: dynamic bounding volume hierarchy with margin-padded leaves
//! - [`SortAndSweep`]: per-axis sorted endpoints kept in order by insertion sort
//!
//! Every strategy tracks proxies by [`ProxyId`] and keeps its own copy of each
//! proxy's current AABB; callers refresh it with [`BroadPhase::set_aabb`]
//! before [`BroadPhase::update`]. Pairs are canonical (`a < b`) and returned
//! sorted ascending. Overlap is inclusive on faces.

mod brute_force;
mod bvh;
mod sort_and_sweep;

use std::sync::Arc;

pub use brute_force::BruteForce;
pub use bvh::Bvh;
pub use sort_and_sweep::SortAndSweep;

use crate::error::Result;
use crate::jobs::JobSystem;

use super::aabb::Aabb;

/// Key of an object tracked by a broad phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId(pub u32);

/// Unordered pair of proxies, stored with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollisionPair {
    pub a: ProxyId,
    pub b: ProxyId,
}

impl CollisionPair {
    /// Canonicalise an unordered pair.
    #[inline]
    pub fn new(x: ProxyId, y: ProxyId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    #[inline]
    pub fn contains(&self, id: ProxyId) -> bool {
        self.a == id || self.b == id
    }
}

/// Common contract of the broad-phase strategies.
pub trait BroadPhase {
    /// Start tracking a proxy. Adding an id twice replaces its AABB.
    fn add(&mut self, id: ProxyId, aabb: Aabb);

    /// Stop tracking a proxy. Untracked ids are an error.
    fn remove(&mut self, id: ProxyId) -> Result<()>;

    /// Refresh the live AABB of a tracked proxy.
    fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> Result<()>;

    /// Drop every proxy.
    fn clear(&mut self);

    /// Bring internal structures in line with the live AABBs.
    fn update(&mut self);

    /// Candidate pairs, canonical and sorted.
    fn calculate_pairs(&mut self) -> Vec<CollisionPair>;

    /// Overlap tests performed by the last [`BroadPhase::calculate_pairs`]
    /// (or update, for strategies that find pairs while updating).
    fn checks_made(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Boxes worth drawing for debugging (tree nodes, proxies).
    fn debug_bounds(&self) -> Vec<Aabb>;
}

/// Which broad-phase strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BroadPhaseKind {
    BruteForce,
    #[default]
    Bvh,
    SortAndSweep,
}

/// Closed set of broad-phase strategies, dispatched by variant.
pub enum AnyBroadPhase {
    BruteForce(BruteForce),
    Bvh(Bvh),
    SortAndSweep(SortAndSweep),
}

impl AnyBroadPhase {
    /// Build an empty broad phase of the given kind.
    ///
    /// `bvh_margin` pads BVH leaves; `jobs` runs the sort-and-sweep axis passes.
    pub fn new(kind: BroadPhaseKind, bvh_margin: f32, jobs: Arc<dyn JobSystem>) -> Self {
        match kind {
            BroadPhaseKind::BruteForce => AnyBroadPhase::BruteForce(BruteForce::new()),
            BroadPhaseKind::Bvh => AnyBroadPhase::Bvh(Bvh::with_margin(bvh_margin)),
            BroadPhaseKind::SortAndSweep => AnyBroadPhase::SortAndSweep(SortAndSweep::new(jobs)),
        }
    }

    pub fn kind(&self) -> BroadPhaseKind {
        match self {
            AnyBroadPhase::BruteForce(_) => BroadPhaseKind::BruteForce,
            AnyBroadPhase::Bvh(_) => BroadPhaseKind::Bvh,
            AnyBroadPhase::SortAndSweep(_) => BroadPhaseKind::SortAndSweep,
        }
    }

    fn inner(&self) -> &dyn BroadPhase {
        match self {
            AnyBroadPhase::BruteForce(bp) => bp,
            AnyBroadPhase::Bvh(bp) => bp,
            AnyBroadPhase::SortAndSweep(bp) => bp,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn BroadPhase {
        match self {
            AnyBroadPhase::BruteForce(bp) => bp,
            AnyBroadPhase::Bvh(bp) => bp,
            AnyBroadPhase::SortAndSweep(bp) => bp,
        }
    }
}

impl BroadPhase for AnyBroadPhase {
    fn add(&mut self, id: ProxyId, aabb: Aabb) {
        self.inner_mut().add(id, aabb);
    }

    fn remove(&mut self, id: ProxyId) -> Result<()> {
        self.inner_mut().remove(id)
    }

    fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> Result<()> {
        self.inner_mut().set_aabb(id, aabb)
    }

    fn clear(&mut self) {
        self.inner_mut().clear();
    }

    fn update(&mut self) {
        self.inner_mut().update();
    }

    fn calculate_pairs(&mut self) -> Vec<CollisionPair> {
        self.inner_mut().calculate_pairs()
    }

    fn checks_made(&self) -> usize {
        self.inner().checks_made()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn debug_bounds(&self) -> Vec<Aabb> {
        self.inner().debug_bounds()
    }
}
