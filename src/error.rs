//! Error types shared by the collision, dynamics and job modules.

use glam::Vec3;
use thiserror::Error;

use crate::jobs::JobError;
use crate::physics::broadphase::ProxyId;
use crate::physics::collision_world::ColliderHandle;
use crate::physics::manager::BodyHandle;

/// Errors raised by the physics core.
///
/// Geometry validation happens at construction time so that bad input never
/// turns into NaNs halfway through a step.
#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("mass must be finite and positive, got {0}")]
    InvalidMass(f32),

    #[error("dimensions must be finite and positive, got {0}")]
    InvalidDimensions(Vec3),

    #[error("invalid collider shape: {0}")]
    InvalidShape(&'static str),

    #[error("inverted bounds: min {min} is greater than max {max}")]
    InvertedBounds { min: Vec3, max: Vec3 },

    #[error("body {0:?} is not tracked by the physics manager")]
    UnknownBody(BodyHandle),

    #[error("collider {0:?} is not tracked by the collision world")]
    UnknownCollider(ColliderHandle),

    #[error("proxy {0:?} is not tracked by the broad phase")]
    UnknownProxy(ProxyId),

    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
