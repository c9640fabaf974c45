//! kinesis physics core
//!
//! Collision detection and rigid body stepping for 3D scenes.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **transform** - Position/orientation/scale pose with a cached matrix
//! 2. **jobs** - Priority thread pool behind the `JobSystem` trait
//! 3. **physics** - Broad phase, GJK narrow phase, rigid bodies, K-D tree, physics manager
//! 4. **debug** - Debug-draw trait and a line-list collector
//! 5. **ecs** - hecs ECS integration (feature = "ecs")

pub mod debug;
pub mod error;
pub mod jobs;
pub mod physics;
pub mod transform;

#[cfg(feature = "ecs")]
pub mod ecs;

// Re-export commonly used types
pub use debug::{DebugDraw, DebugLines, DebugVertex};
pub use error::{PhysicsError, Result};
pub use jobs::{InlineExecutor, JobHandle, JobPriority, JobSystem, JobSystemExt, ThreadPool};
pub use physics::{
    Aabb, BodyHandle, BroadPhase, BroadPhaseKind, ColliderHandle, ColliderShape, CollisionConfig,
    CollisionPair, CollisionStatus, CollisionWorld, Gjk, GjkOutcome, KdTree, KdTreeConfig,
    PhysicsConfig, PhysicsDebugFlags, PhysicsManager, ProxyId, RigidBody,
};
pub use transform::Transform;

#[cfg(feature = "ecs")]
pub use ecs::prelude::*;

// Re-export glam for convenience
pub use glam;
