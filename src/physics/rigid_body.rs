//! Rigid body state and momentum-based integration.

use glam::{Mat3, Quat, Vec3};

use crate::error::{PhysicsError, Result};
use crate::transform::Transform;

/// Mass properties and momenta of one body.
///
/// Inertia comes from a solid box approximation of `dimensions` (full
/// width, height, depth) and is recomputed whenever mass or dimensions change.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    mass: f32,
    dimensions: Vec3,
    inertia: Mat3,
    inverse_inertia: Mat3,
    pub linear_momentum: Vec3,
    pub angular_momentum: Vec3,
    pub gravity_affected: bool,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self::new()
    }
}

fn box_inertia(mass: f32, dimensions: Vec3) -> Mat3 {
    let Vec3 { x: w, y: h, z: d } = dimensions;
    let k = mass / 12.0;
    Mat3::from_diagonal(Vec3::new(
        k * (h * h + d * d),
        k * (w * w + d * d),
        k * (w * w + h * h),
    ))
}

impl RigidBody {
    /// Unit mass, unit cube, zero momenta, affected by gravity.
    pub fn new() -> Self {
        let mut body = Self {
            mass: 1.0,
            dimensions: Vec3::ONE,
            inertia: Mat3::IDENTITY,
            inverse_inertia: Mat3::IDENTITY,
            linear_momentum: Vec3::ZERO,
            angular_momentum: Vec3::ZERO,
            gravity_affected: true,
        };
        body.recalculate_inertia();
        body
    }

    /// Body with the given mass and box dimensions.
    pub fn with_mass_and_dimensions(mass: f32, dimensions: Vec3) -> Result<Self> {
        let mut body = Self::new();
        body.set_mass(mass)?;
        body.set_dimensions(dimensions)?;
        Ok(body)
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f32) -> Result<()> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(PhysicsError::InvalidMass(mass));
        }
        self.mass = mass;
        self.recalculate_inertia();
        Ok(())
    }

    pub fn dimensions(&self) -> Vec3 {
        self.dimensions
    }

    pub fn set_dimensions(&mut self, dimensions: Vec3) -> Result<()> {
        if !dimensions.is_finite() || dimensions.cmple(Vec3::ZERO).any() {
            return Err(PhysicsError::InvalidDimensions(dimensions));
        }
        self.dimensions = dimensions;
        self.recalculate_inertia();
        Ok(())
    }

    /// Local-space inertia tensor.
    pub fn inertia(&self) -> Mat3 {
        self.inertia
    }

    pub fn inverse_inertia(&self) -> Mat3 {
        self.inverse_inertia
    }

    /// Inverse inertia rotated into world space: `R I⁻¹ Rᵀ`.
    pub fn world_inverse_inertia(&self, orientation: Quat) -> Mat3 {
        let rotation = Mat3::from_quat(orientation.normalize());
        rotation * self.inverse_inertia * rotation.transpose()
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_momentum / self.mass
    }

    pub fn angular_velocity(&self, orientation: Quat) -> Vec3 {
        self.world_inverse_inertia(orientation) * self.angular_momentum
    }

    fn recalculate_inertia(&mut self) {
        self.inertia = box_inertia(self.mass, self.dimensions);
        self.inverse_inertia = self.inertia.inverse();
    }

    /// Add to linear momentum directly (no time scaling).
    pub fn apply_force(&mut self, force: Vec3) {
        self.linear_momentum += force;
    }

    /// Add to linear momentum and to angular momentum about `body_position`.
    pub fn apply_force_at_position(&mut self, force: Vec3, position: Vec3, body_position: Vec3) {
        self.linear_momentum += force;
        self.angular_momentum += (position - body_position).cross(force);
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        self.angular_momentum += torque;
    }

    /// Gravity impulse `gravity * mass * dt`, if the body is affected.
    pub fn apply_gravity(&mut self, gravity: Vec3, dt: f32) {
        if self.gravity_affected {
            self.linear_momentum += gravity * self.mass * dt;
        }
    }

    /// Advance the pose by `dt` from the current momenta.
    ///
    /// The orientation update is additive (`q += 0.5 * ω q`) followed by an
    /// explicit renormalisation.
    pub fn integrate(&self, transform: &mut Transform, dt: f32) {
        transform.translate(self.linear_velocity() * dt);

        let orientation = transform.orientation();
        let angular = self.world_inverse_inertia(orientation) * self.angular_momentum * dt;
        let angular_quat = Quat::from_xyzw(angular.x, angular.y, angular.z, 0.0);
        let spin = (angular_quat * orientation) * 0.5;

        transform.set_orientation(orientation + spin);
        transform.renormalize();
    }

    /// One step: gravity, then integration.
    pub fn simulate(&mut self, transform: &mut Transform, gravity: Vec3, dt: f32) {
        self.apply_gravity(gravity, dt);
        self.integrate(transform, dt);
    }
}
