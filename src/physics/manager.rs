//! Physics manager: owns the bodies and steps them in parallel shards.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::Mutex;

use crate::debug::{self, DebugDraw};
use crate::error::{PhysicsError, Result};
use crate::jobs::{JobError, JobPriority, JobSystem, JobSystemExt};
use crate::transform::Transform;

use super::aabb::Aabb;
use super::kd_tree::KdTree;
use super::rigid_body::RigidBody;
use super::PhysicsConfig;

/// Stable key of a body owned by a [`PhysicsManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle(u32);

impl BodyHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A simulated body: pose plus rigid body state.
#[derive(Debug, Clone)]
pub struct Body {
    handle: BodyHandle,
    pub transform: Transform,
    pub rigid_body: RigidBody,
}

impl Body {
    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    fn step(&mut self, gravity: Vec3, dt: f32) {
        self.rigid_body.simulate(&mut self.transform, gravity, dt);
    }
}

/// Split `total` items into at most `shards` contiguous ranges.
///
/// Each range holds `total / shards` items and the last one absorbs the
/// remainder. When there are fewer items than shards, everything goes into
/// a single range. Never returns an empty range, and never returns zero
/// ranges for a non-zero total.
pub fn partition_ranges(total: usize, shards: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return Vec::new();
    }
    let shards = shards.max(1);
    let mut size = total / shards;
    if size == 0 {
        size = total % shards;
    }

    let mut ranges = Vec::with_capacity(shards);
    for i in 0..shards {
        let start = i * size;
        if start >= total {
            break;
        }
        let end = if i == shards - 1 {
            total
        } else {
            (start + size).min(total)
        };
        ranges.push(start..end);
    }
    if let Some(last) = ranges.last_mut() {
        last.end = total;
    }
    ranges
}

/// Owns every body, the spatial index over their positions and the
/// fixed-timestep clock.
pub struct PhysicsManager {
    config: PhysicsConfig,
    jobs: Arc<dyn JobSystem>,
    bodies: Vec<Body>,
    index_of: HashMap<BodyHandle, usize>,
    spatial_index: KdTree<BodyHandle>,
    next_handle: u32,
    accumulator: f64,
    steps: u64,
}

impl PhysicsManager {
    pub fn new(config: PhysicsConfig, jobs: Arc<dyn JobSystem>) -> Self {
        let spatial_index = KdTree::new(config.spatial_index);
        Self {
            config,
            jobs,
            bodies: Vec::new(),
            index_of: HashMap::new(),
            spatial_index,
            next_handle: 0,
            accumulator: 0.0,
            steps: 0,
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PhysicsConfig {
        &mut self.config
    }

    pub fn set_simulation_enabled(&mut self, enabled: bool) {
        self.config.simulation_enabled = enabled;
    }

    pub fn simulation_enabled(&self) -> bool {
        self.config.simulation_enabled
    }

    /// Completed simulation steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn spatial_index(&self) -> &KdTree<BodyHandle> {
        &self.spatial_index
    }

    /// Add a body and mirror it into the spatial index.
    pub fn add_body(&mut self, transform: Transform, rigid_body: RigidBody) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;

        self.index_of.insert(handle, self.bodies.len());
        self.spatial_index.insert(handle, transform.position());
        self.bodies.push(Body {
            handle,
            transform,
            rigid_body,
        });
        handle
    }

    /// Remove a body from the manager and the spatial index.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<Body> {
        let index = self
            .index_of
            .remove(&handle)
            .ok_or(PhysicsError::UnknownBody(handle))?;
        let body = self.bodies.swap_remove(index);
        if let Some(moved) = self.bodies.get(index) {
            self.index_of.insert(moved.handle, index);
        }
        self.spatial_index.remove(&handle);
        Ok(body)
    }

    pub fn body(&self, handle: BodyHandle) -> Result<&Body> {
        let index = self
            .index_of
            .get(&handle)
            .ok_or(PhysicsError::UnknownBody(handle))?;
        Ok(&self.bodies[*index])
    }

    /// Mutable access to a body. Moving it this way leaves the spatial
    /// index stale until the next step; use [`Self::set_transform`] to
    /// update both.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut Body> {
        let index = self
            .index_of
            .get(&handle)
            .ok_or(PhysicsError::UnknownBody(handle))?;
        Ok(&mut self.bodies[*index])
    }

    pub fn set_transform(&mut self, handle: BodyHandle, transform: Transform) -> Result<()> {
        self.body_mut(handle)?.transform = transform;
        self.spatial_index.insert(handle, transform.position());
        Ok(())
    }

    /// Advance every body by `dt`, one job per shard.
    ///
    /// Returns once every shard has finished. Each shard lives in a slot the
    /// manager keeps hold of, so a failed job never loses bodies: after a
    /// panic or a dropped job every body is still present (a panicking shard
    /// may be partly stepped) and the step is not counted. A panic inside a
    /// shard is then re-raised here; a dropped job returns
    /// [`PhysicsError::Job`].
    pub fn step_simulation(&mut self, dt: f32) -> Result<()> {
        if !self.config.simulation_enabled || self.bodies.is_empty() {
            return Ok(());
        }

        let shard_count = self
            .config
            .worker_shards
            .unwrap_or_else(|| self.jobs.worker_count());
        let ranges = partition_ranges(self.bodies.len(), shard_count);
        let gravity = self.config.gravity;

        // Split into contiguous shards, each behind its own lock.
        let mut remaining = std::mem::take(&mut self.bodies);
        let mut shards = Vec::with_capacity(ranges.len());
        for range in ranges.iter().rev() {
            shards.push(Arc::new(Mutex::new(remaining.split_off(range.start))));
        }
        shards.reverse();

        let handles: Vec<_> = shards
            .iter()
            .map(|shard| {
                let shard = Arc::clone(shard);
                self.jobs.submit(JobPriority::High, move || {
                    for body in shard.lock().iter_mut() {
                        body.step(gravity, dt);
                    }
                })
            })
            .collect();

        // Join every shard before looking at any result.
        let mut failure = None;
        for handle in handles {
            if let Err(err) = handle.wait() {
                failure.get_or_insert(err);
            }
        }
        for shard in &shards {
            self.bodies.append(&mut shard.lock());
        }

        if let Some(err) = failure {
            self.rebuild_spatial_index();
            match err {
                JobError::Panicked(message) => std::panic::resume_unwind(Box::new(message)),
                other => return Err(other.into()),
            }
        }

        self.steps += 1;
        if self.config.rebuild_index_after_step {
            self.rebuild_spatial_index();
        }
        tracing::trace!(
            bodies = self.bodies.len(),
            shards = ranges.len(),
            dt,
            "physics step"
        );
        Ok(())
    }

    /// Advance by a frame's worth of time in fixed steps.
    ///
    /// Returns the number of steps taken. Leftover time carries over to the
    /// next frame; a backlog beyond `max_substeps` steps is dropped.
    pub fn update(&mut self, frame_dt: f64) -> Result<u32> {
        let fixed = self.config.fixed_timestep;
        self.accumulator += frame_dt;

        let mut substeps = 0u32;
        while self.accumulator >= fixed && substeps < self.config.max_substeps {
            self.step_simulation(fixed as f32)?;
            self.accumulator -= fixed;
            substeps += 1;
        }

        // Clamp accumulator to avoid spiral of death
        if self.accumulator > fixed * self.config.max_substeps as f64 {
            tracing::debug!(dropped = self.accumulator, "physics fell behind, dropping time");
            self.accumulator = 0.0;
        }
        Ok(substeps)
    }

    /// Time carried over to the next [`Self::update`].
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Rebuild the spatial index from current body positions.
    pub fn rebuild_spatial_index(&mut self) {
        self.spatial_index.rebuild_from(
            self.bodies
                .iter()
                .map(|b| (b.handle, b.transform.position())),
        );
    }

    /// Closest body to `point`, skipping `exclude`.
    pub fn nearest_body(&self, point: Vec3, exclude: Option<BodyHandle>) -> Option<(BodyHandle, f32)> {
        match exclude {
            Some(excluded) => self
                .spatial_index
                .nearest_neighbour_filtered(point, |h| *h != excluded),
            None => self.spatial_index.nearest_neighbour(point),
        }
    }

    /// Bodies within `radius` of `point`.
    pub fn bodies_within(&self, point: Vec3, radius: f32) -> Vec<BodyHandle> {
        self.spatial_index.within_radius(point, radius)
    }

    /// Emit debug boxes for the layers enabled in the config.
    pub fn debug_draw(&self, draw: &mut dyn DebugDraw) {
        let flags = self.config.debug;
        if flags.draw_bodies {
            for body in &self.bodies {
                let local = Aabb::from_center_half_extents(
                    Vec3::ZERO,
                    body.rigid_body.dimensions() * 0.5,
                );
                draw.draw_box(&local, debug::WHITE, &body.transform.compute_matrix());
            }
        }
        if flags.draw_spatial_index {
            for bounds in self.spatial_index.leaf_bounds() {
                draw.draw_box(&bounds, debug::MAGENTA, &Mat4::IDENTITY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugLines;
    use crate::jobs::{InlineExecutor, Job, ThreadPool};
    use crate::physics::PhysicsDebugFlags;

    fn manager(jobs: Arc<dyn JobSystem>) -> PhysicsManager {
        PhysicsManager::new(PhysicsConfig::default(), jobs)
    }

    fn grid(manager: &mut PhysicsManager, count: u32) -> Vec<BodyHandle> {
        (0..count)
            .map(|i| {
                let position = Vec3::new((i % 10) as f32 * 2.0, 10.0, (i / 10) as f32 * 2.0);
                manager.add_body(Transform::from_position(position), RigidBody::new())
            })
            .collect()
    }

    #[test]
    fn test_partition_ranges() {
        assert_eq!(partition_ranges(10, 4), vec![0..2, 2..4, 4..6, 6..10]);
        assert_eq!(partition_ranges(3, 4), vec![0..3]);
        assert_eq!(partition_ranges(8, 1), vec![0..8]);
        assert_eq!(partition_ranges(8, 0), vec![0..8]);
        assert!(partition_ranges(0, 4).is_empty());

        for total in 1..50 {
            for shards in 1..9 {
                let ranges = partition_ranges(total, shards);
                assert!(!ranges.is_empty());
                assert!(ranges.len() <= shards);
                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges.last().unwrap().end, total);
                assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
                assert!(ranges.iter().all(|r| !r.is_empty()));
            }
        }
    }

    #[test]
    fn test_two_kilogram_body_falls() {
        let mut manager = manager(Arc::new(InlineExecutor));
        let mut body = RigidBody::new();
        body.set_mass(2.0).unwrap();
        let handle = manager.add_body(Transform::identity(), body);

        manager.step_simulation(1.0).unwrap();

        let body = manager.body(handle).unwrap();
        let eps = 1e-5;
        assert!((body.rigid_body.linear_momentum - Vec3::new(0.0, -19.62, 0.0)).length() < eps);
        assert!((body.transform.position() - Vec3::new(0.0, -9.81, 0.0)).length() < eps);
    }

    #[test]
    fn test_sharded_step_matches_inline() {
        let mut inline = manager(Arc::new(InlineExecutor));
        let mut pooled = manager(Arc::new(ThreadPool::new(4)));
        let handles = grid(&mut inline, 103);
        grid(&mut pooled, 103);

        for _ in 0..5 {
            inline.step_simulation(1.0 / 60.0).unwrap();
            pooled.step_simulation(1.0 / 60.0).unwrap();
        }

        assert_eq!(pooled.len(), 103);
        for handle in handles {
            let a = inline.body(handle).unwrap();
            let b = pooled.body(handle).unwrap();
            assert_eq!(a.handle(), b.handle());
            assert_eq!(a.transform.position(), b.transform.position());
        }
        // Order survives the shard round trip.
        assert!(pooled
            .bodies()
            .windows(2)
            .all(|w| w[0].handle() < w[1].handle()));
    }

    #[test]
    fn test_more_shards_than_bodies() {
        let config = PhysicsConfig {
            worker_shards: Some(16),
            ..Default::default()
        };
        let mut manager = PhysicsManager::new(config, Arc::new(ThreadPool::new(2)));
        let handles = grid(&mut manager, 3);
        manager.step_simulation(0.5).unwrap();
        for handle in handles {
            assert!(manager.body(handle).unwrap().transform.position().y < 10.0);
        }
    }

    /// Accepts jobs and drops them unrun.
    struct DroppingExecutor;

    impl JobSystem for DroppingExecutor {
        fn execute(&self, _priority: JobPriority, _job: Job) {}

        fn worker_count(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_dropped_jobs_keep_every_body() {
        let mut manager = manager(Arc::new(DroppingExecutor));
        let handles = grid(&mut manager, 5);

        let result = manager.step_simulation(1.0);
        assert!(matches!(result, Err(PhysicsError::Job(JobError::Disconnected))));
        assert_eq!(manager.len(), 5);
        assert_eq!(manager.steps(), 0);
        for (i, handle) in handles.iter().enumerate() {
            let body = manager.body(*handle).unwrap();
            assert_eq!(body.handle(), *handle);
            assert_eq!(body.transform.position().y, 10.0);
            assert_eq!(manager.bodies()[i].handle(), *handle);
        }
        assert_eq!(manager.spatial_index().len(), 5);
    }

    #[test]
    fn test_disabled_simulation_does_not_move() {
        let mut manager = manager(Arc::new(InlineExecutor));
        let handle = manager.add_body(Transform::from_position(Vec3::Y), RigidBody::new());
        manager.set_simulation_enabled(false);
        manager.step_simulation(1.0).unwrap();
        assert_eq!(manager.body(handle).unwrap().transform.position(), Vec3::Y);
        assert_eq!(manager.steps(), 0);
    }

    #[test]
    fn test_remove_body_updates_spatial_index() {
        let mut manager = manager(Arc::new(InlineExecutor));
        let a = manager.add_body(Transform::from_position(Vec3::ZERO), RigidBody::new());
        let b = manager.add_body(Transform::from_position(Vec3::X * 5.0), RigidBody::new());
        let c = manager.add_body(Transform::from_position(Vec3::X * 10.0), RigidBody::new());

        assert_eq!(manager.nearest_body(Vec3::X, None).unwrap().0, a);
        let removed = manager.remove_body(a).unwrap();
        assert_eq!(removed.handle(), a);
        assert_eq!(manager.nearest_body(Vec3::X, None).unwrap().0, b);
        assert!(!manager.spatial_index().contains(&a));

        // The swapped body is still reachable by handle.
        assert_eq!(manager.body(c).unwrap().transform.position(), Vec3::X * 10.0);
        assert!(matches!(manager.remove_body(a), Err(PhysicsError::UnknownBody(_))));
        assert!(manager.body(a).is_err());
    }

    #[test]
    fn test_nearest_body_excludes_self() {
        let mut manager = manager(Arc::new(InlineExecutor));
        let a = manager.add_body(Transform::from_position(Vec3::ZERO), RigidBody::new());
        let b = manager.add_body(Transform::from_position(Vec3::Y * 3.0), RigidBody::new());
        let (nearest, distance) = manager.nearest_body(Vec3::ZERO, Some(a)).unwrap();
        assert_eq!(nearest, b);
        assert!((distance - 3.0).abs() < 1e-5);

        let mut within = manager.bodies_within(Vec3::ZERO, 3.0);
        within.sort();
        assert_eq!(within, vec![a, b]);
    }

    #[test]
    fn test_spatial_index_follows_step() {
        let mut manager = manager(Arc::new(InlineExecutor));
        let handle = manager.add_body(Transform::identity(), RigidBody::new());
        manager.step_simulation(1.0).unwrap();
        let indexed = manager.spatial_index().position(&handle).unwrap();
        assert_eq!(indexed, manager.body(handle).unwrap().transform.position());
    }

    #[test]
    fn test_update_fixed_timestep() {
        let mut manager = manager(Arc::new(InlineExecutor));
        manager.add_body(Transform::identity(), RigidBody::new());

        // Two and a half fixed steps.
        assert_eq!(manager.update(2.5 / 60.0).unwrap(), 2);
        assert!((manager.accumulator() - 0.5 / 60.0).abs() < 1e-9);

        // A long stall runs max_substeps and drops the rest.
        assert_eq!(manager.update(1.0).unwrap(), 4);
        assert_eq!(manager.accumulator(), 0.0);
        assert_eq!(manager.steps(), 6);
    }

    #[test]
    fn test_debug_draw_flags() {
        let config = PhysicsConfig {
            debug: PhysicsDebugFlags {
                draw_bodies: true,
                draw_spatial_index: false,
            },
            ..Default::default()
        };
        let mut manager = PhysicsManager::new(config, Arc::new(InlineExecutor));
        grid(&mut manager, 3);

        let mut lines = DebugLines::new();
        manager.debug_draw(&mut lines);
        assert_eq!(lines.line_count(), 36);

        manager.config_mut().debug = PhysicsDebugFlags {
            draw_bodies: false,
            draw_spatial_index: true,
        };
        lines.clear();
        manager.debug_draw(&mut lines);
        assert_eq!(lines.line_count(), 12);
    }
}
