//! Pose of a simulated object.

use glam::{Mat4, Quat, Vec3};

/// Position, orientation and scale with a lazily cached world matrix.
///
/// Every setter invalidates the cache. The orientation is renormalised
/// before it is composed into a matrix, so an integrator that updates it
/// additively never leaks drift into the matrix.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    position: Vec3,
    orientation: Quat,
    scale: Vec3,
    cached: Option<Mat4>,
}

impl Transform {
    /// Create an identity transform.
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            cached: None,
        }
    }

    /// Create a transform from a position.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    /// Create a transform from a position and an orientation.
    pub fn from_position_orientation(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation: orientation.normalize(),
            ..Self::identity()
        }
    }

    /// Decompose a 4x4 matrix into a Transform.
    ///
    /// Note: This assumes the matrix represents a valid affine transform
    /// (no shear).
    pub fn from_matrix(mat: Mat4) -> Self {
        let (scale, orientation, position) = mat.to_scale_rotation_translation();
        Self {
            position,
            orientation,
            scale,
            cached: None,
        }
    }

    /// Builder-style scale.
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.set_scale(scale);
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.cached = None;
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
        self.cached = None;
    }

    /// Set the orientation. The quaternion is stored as given; it is
    /// renormalised before use in [`Transform::matrix`].
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.cached = None;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.cached = None;
    }

    /// Renormalise the stored orientation in place.
    pub fn renormalize(&mut self) {
        let length_squared = self.orientation.length_squared();
        if length_squared > f32::EPSILON {
            self.orientation = self.orientation.normalize();
        } else {
            self.orientation = Quat::IDENTITY;
        }
        self.cached = None;
    }

    /// World matrix (translation * rotation * scale), cached until the next change.
    pub fn matrix(&mut self) -> Mat4 {
        match self.cached {
            Some(mat) => mat,
            None => {
                let mat = self.compute_matrix();
                self.cached = Some(mat);
                mat
            }
        }
    }

    /// World matrix computed without touching the cache.
    pub fn compute_matrix(&self) -> Mat4 {
        let orientation = if self.orientation.length_squared() > f32::EPSILON {
            self.orientation.normalize()
        } else {
            Quat::IDENTITY
        };
        Mat4::from_scale_rotation_translation(self.scale, orientation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.orientation == other.orientation
            && self.scale == other.scale
    }
}
