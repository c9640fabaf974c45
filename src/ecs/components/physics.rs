//! Physics components for ECS entities.

use crate::physics::aabb::CollisionStatus;
use crate::physics::collision_world::ColliderHandle;
use crate::physics::manager::BodyHandle;

/// Entity is simulated by a `PhysicsManager` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicsBody(pub BodyHandle);

/// Entity has a collider in a `CollisionWorld`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColliderComponent(pub ColliderHandle);

/// Status from the most recent collision pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionState(pub CollisionStatus);

impl CollisionState {
    pub fn is_colliding(&self) -> bool {
        self.0 == CollisionStatus::Colliding
    }
}
