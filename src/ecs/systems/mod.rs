//! ECS systems.

pub mod physics;

pub use physics::{
    collision_system, despawn_physics_entity, physics_sync_system, spawn_physics_entity,
};
