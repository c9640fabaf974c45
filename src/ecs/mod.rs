//! hecs integration: components that point at physics state and systems that
//! copy it between the ECS world and the physics core.
//!
//! Entities never own physics state directly. A [`PhysicsBody`] or
//! [`ColliderComponent`] is a handle into a [`PhysicsManager`] or
//! [`CollisionWorld`]; the systems keep the entity's [`Transform`] in step.
//!
//! [`PhysicsManager`]: crate::physics::PhysicsManager
//! [`CollisionWorld`]: crate::physics::CollisionWorld

pub mod components;
pub mod systems;

pub mod prelude {
    pub use super::components::{ColliderComponent, CollisionState, PhysicsBody, Transform};
    pub use super::systems::{
        collision_system, despawn_physics_entity, physics_sync_system, spawn_physics_entity,
    };
}
