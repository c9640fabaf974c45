//! Collision world: colliders, broad phase and narrow phase tied together.
//!
//! Every [`CollisionWorld::update`] recomputes each collider's world AABB from
//! its transform, feeds the boxes to the active broad phase, marks candidate
//! pairs [`CollisionStatus::Potential`] and promotes the ones GJK confirms to
//! [`CollisionStatus::Colliding`].

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Mat4;

use crate::debug::{self, DebugDraw};
use crate::error::{PhysicsError, Result};
use crate::jobs::JobSystem;
use crate::transform::Transform;

use super::aabb::{Aabb, ColliderBounds, CollisionStatus};
use super::broadphase::{AnyBroadPhase, BroadPhase, BroadPhaseKind, CollisionPair, ProxyId};
use super::collider::ColliderShape;
use super::narrowphase::{Gjk, Placed, DEFAULT_MAX_ITERATIONS};

/// Stable key of a collider. Doubles as its broad-phase proxy id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColliderHandle(u32);

impl ColliderHandle {
    #[inline]
    pub fn proxy(self) -> ProxyId {
        ProxyId(self.0)
    }

    #[inline]
    pub fn from_proxy(proxy: ProxyId) -> Self {
        Self(proxy.0)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Which collision layers get drawn by [`CollisionWorld::debug_draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionDebugFlags {
    /// Each collider's world AABB, colored by collision status.
    pub draw_aabbs: bool,
    /// Broad-phase internals (BVH nodes, tracked boxes).
    pub draw_broad_phase: bool,
}

/// Configuration for a [`CollisionWorld`].
#[derive(Debug, Clone)]
pub struct CollisionConfig {
    /// Broad-phase strategy. Default: BVH.
    pub broad_phase: BroadPhaseKind,
    /// BVH leaf padding. Default: 0.5.
    pub bvh_margin: f32,
    /// GJK iteration cap; exhausting it counts as no collision. Default: 100.
    pub gjk_max_iterations: usize,
    pub debug: CollisionDebugFlags,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            broad_phase: BroadPhaseKind::Bvh,
            bvh_margin: 0.5,
            gjk_max_iterations: DEFAULT_MAX_ITERATIONS,
            debug: CollisionDebugFlags::default(),
        }
    }
}

#[derive(Debug)]
struct ColliderObject {
    shape: ColliderShape,
    transform: Transform,
    world: Mat4,
    bounds: ColliderBounds,
}

impl ColliderObject {
    fn new(shape: ColliderShape, mut transform: Transform) -> Self {
        let world = transform.matrix();
        let mut bounds = ColliderBounds::from_local(shape.local_bounds());
        bounds.recalculate(&world);
        Self {
            shape,
            transform,
            world,
            bounds,
        }
    }
}

pub struct CollisionWorld {
    config: CollisionConfig,
    jobs: Arc<dyn JobSystem>,
    colliders: BTreeMap<ColliderHandle, ColliderObject>,
    next_handle: u32,
    broad_phase: AnyBroadPhase,
    gjk: Gjk,
    candidates: Vec<CollisionPair>,
    collisions: Vec<CollisionPair>,
}

impl CollisionWorld {
    pub fn new(config: CollisionConfig, jobs: Arc<dyn JobSystem>) -> Self {
        let broad_phase = AnyBroadPhase::new(config.broad_phase, config.bvh_margin, Arc::clone(&jobs));
        let gjk = Gjk::new(config.gjk_max_iterations);
        Self {
            config,
            jobs,
            colliders: BTreeMap::new(),
            next_handle: 0,
            broad_phase,
            gjk,
            candidates: Vec::new(),
            collisions: Vec::new(),
        }
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    pub fn set_debug_flags(&mut self, flags: CollisionDebugFlags) {
        self.config.debug = flags;
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = ColliderHandle> + '_ {
        self.colliders.keys().copied()
    }

    /// Start tracking a collider at the given pose.
    pub fn add_collider(&mut self, shape: ColliderShape, transform: Transform) -> ColliderHandle {
        let handle = ColliderHandle(self.next_handle);
        self.next_handle += 1;

        let object = ColliderObject::new(shape, transform);
        self.broad_phase.add(handle.proxy(), object.bounds.aabb());
        self.colliders.insert(handle, object);
        handle
    }

    /// Stop tracking a collider and drop it from the broad phase.
    pub fn remove_collider(&mut self, handle: ColliderHandle) -> Result<ColliderShape> {
        let object = self
            .colliders
            .remove(&handle)
            .ok_or(PhysicsError::UnknownCollider(handle))?;
        self.broad_phase.remove(handle.proxy())?;

        let proxy = handle.proxy();
        self.candidates.retain(|p| !p.contains(proxy));
        self.collisions.retain(|p| !p.contains(proxy));
        Ok(object.shape)
    }

    fn object(&self, handle: ColliderHandle) -> Result<&ColliderObject> {
        self.colliders
            .get(&handle)
            .ok_or(PhysicsError::UnknownCollider(handle))
    }

    pub fn set_transform(&mut self, handle: ColliderHandle, transform: Transform) -> Result<()> {
        let object = self
            .colliders
            .get_mut(&handle)
            .ok_or(PhysicsError::UnknownCollider(handle))?;
        object.transform = transform;
        Ok(())
    }

    pub fn transform(&self, handle: ColliderHandle) -> Result<&Transform> {
        Ok(&self.object(handle)?.transform)
    }

    pub fn shape(&self, handle: ColliderHandle) -> Result<&ColliderShape> {
        Ok(&self.object(handle)?.shape)
    }

    /// World AABB as of the last update (or insertion).
    pub fn bounds(&self, handle: ColliderHandle) -> Result<Aabb> {
        Ok(self.object(handle)?.bounds.aabb())
    }

    pub fn status(&self, handle: ColliderHandle) -> Result<CollisionStatus> {
        Ok(self.object(handle)?.bounds.status)
    }

    /// Run one collision pass.
    pub fn update(&mut self) -> Result<()> {
        for (handle, object) in self.colliders.iter_mut() {
            object.world = object.transform.matrix();
            object.bounds.recalculate(&object.world);
            object.bounds.status = CollisionStatus::NoCollision;
            self.broad_phase.set_aabb(handle.proxy(), object.bounds.aabb())?;
        }

        self.broad_phase.update();
        self.candidates = self.broad_phase.calculate_pairs();
        for pair in &self.candidates {
            for proxy in [pair.a, pair.b] {
                if let Some(object) = self.colliders.get_mut(&ColliderHandle::from_proxy(proxy)) {
                    object.bounds.status = CollisionStatus::Potential;
                }
            }
        }

        let colliders = &self.colliders;
        self.collisions = self.gjk.get_collisions(&self.candidates, |proxy| {
            colliders
                .get(&ColliderHandle::from_proxy(proxy))
                .map(|object| Placed::new(&object.shape, object.world))
        });
        for pair in &self.collisions {
            for proxy in [pair.a, pair.b] {
                if let Some(object) = self.colliders.get_mut(&ColliderHandle::from_proxy(proxy)) {
                    object.bounds.status = CollisionStatus::Colliding;
                }
            }
        }

        tracing::trace!(
            colliders = self.colliders.len(),
            candidates = self.candidates.len(),
            collisions = self.collisions.len(),
            broad_phase_checks = self.broad_phase.checks_made(),
            "collision pass"
        );
        Ok(())
    }

    /// Broad-phase candidates from the last update, as proxy pairs.
    pub fn candidate_pairs(&self) -> &[CollisionPair] {
        &self.candidates
    }

    /// Pairs GJK confirmed in the last update, as proxy pairs.
    pub fn collisions(&self) -> &[CollisionPair] {
        &self.collisions
    }

    /// Confirmed collisions as collider handles.
    pub fn colliding_handles(&self) -> Vec<(ColliderHandle, ColliderHandle)> {
        self.collisions
            .iter()
            .map(|p| (ColliderHandle::from_proxy(p.a), ColliderHandle::from_proxy(p.b)))
            .collect()
    }

    pub fn broad_phase(&self) -> &AnyBroadPhase {
        &self.broad_phase
    }

    pub fn broad_phase_checks(&self) -> usize {
        self.broad_phase.checks_made()
    }

    pub fn narrow_phase_checks(&self) -> usize {
        self.gjk.checks_made()
    }

    /// Swap the broad-phase strategy, re-adding every collider.
    pub fn set_broad_phase(&mut self, kind: BroadPhaseKind) {
        if kind == self.broad_phase.kind() {
            return;
        }
        let mut broad_phase = AnyBroadPhase::new(kind, self.config.bvh_margin, Arc::clone(&self.jobs));
        for (handle, object) in &self.colliders {
            broad_phase.add(handle.proxy(), object.bounds.aabb());
        }
        self.broad_phase = broad_phase;
        self.config.broad_phase = kind;
        self.candidates.clear();
        self.collisions.clear();
        tracing::debug!(?kind, colliders = self.colliders.len(), "broad phase switched");
    }

    /// Emit debug boxes for the layers enabled in the config.
    pub fn debug_draw(&self, draw: &mut dyn DebugDraw) {
        let flags = self.config.debug;
        if flags.draw_aabbs {
            for object in self.colliders.values() {
                draw.draw_box(
                    &object.bounds.aabb(),
                    debug::status_color(object.bounds.status),
                    &Mat4::IDENTITY,
                );
            }
        }
        if flags.draw_broad_phase {
            for aabb in self.broad_phase.debug_bounds() {
                draw.draw_box(&aabb, debug::CYAN, &Mat4::IDENTITY);
            }
        }
    }
}
