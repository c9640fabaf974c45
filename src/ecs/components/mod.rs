//! ECS components.

pub mod physics;

pub use crate::transform::Transform;
pub use physics::{ColliderComponent, CollisionState, PhysicsBody};
