//! CPU physics core: collision detection and rigid body stepping.
//!
//! # Architecture
//!
//! Collision and dynamics are independent halves:
//!
//! 1. **aabb** - axis-aligned boxes and per-collider bounds
//! 2. **collider** - convex shapes with GJK support mappings
//! 3. **broadphase** - brute force, BVH and sort-and-sweep candidate search
//! 4. **narrowphase** - GJK boolean intersection over candidate pairs
//! 5. **collision_world** - colliders plus the broad and narrow phase
//! 6. **rigid_body** - momentum-based rigid body integration
//! 7. **kd_tree** - nearest-neighbour index over body positions
//! 8. **manager** - body storage and job-parallel fixed-timestep stepping

pub mod aabb;
pub mod broadphase;
pub mod collider;
pub mod collision_world;
pub mod kd_tree;
pub mod manager;
pub mod narrowphase;
pub mod rigid_body;

use glam::Vec3;

pub use aabb::{Aabb, ColliderBounds, CollisionStatus};
pub use broadphase::{BroadPhase, BroadPhaseKind, CollisionPair, ProxyId};
pub use collider::ColliderShape;
pub use collision_world::{CollisionConfig, CollisionDebugFlags, CollisionWorld, ColliderHandle};
pub use kd_tree::{KdTree, KdTreeConfig};
pub use manager::{Body, BodyHandle, PhysicsManager};
pub use narrowphase::{Gjk, GjkOutcome};
pub use rigid_body::RigidBody;

/// Which dynamics layers get drawn by [`PhysicsManager::debug_draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicsDebugFlags {
    /// Each body's box of `dimensions`, posed by its transform.
    pub draw_bodies: bool,
    /// Leaf buckets of the spatial index.
    pub draw_spatial_index: bool,
}

/// Configuration for the physics simulation.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed timestep for [`PhysicsManager::update`] in seconds. Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of sub-steps per frame. Default: 4.
    pub max_substeps: u32,
    /// Shards per step. `None` uses one per job-system worker.
    pub worker_shards: Option<usize>,
    /// When false, stepping is a no-op. Default: true.
    pub simulation_enabled: bool,
    /// Spatial index tuning.
    pub spatial_index: KdTreeConfig,
    /// Rebuild the spatial index from fresh positions after every step. Default: true.
    pub rebuild_index_after_step: bool,
    pub debug: PhysicsDebugFlags,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 4,
            worker_shards: None,
            simulation_enabled: true,
            spatial_index: KdTreeConfig::default(),
            rebuild_index_after_step: true,
            debug: PhysicsDebugFlags::default(),
        }
    }
}
