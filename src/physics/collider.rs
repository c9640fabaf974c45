//! Convex collider shapes and their support functions.

use glam::{Mat3, Mat4, Vec3};

use crate::error::{PhysicsError, Result};

use super::aabb::Aabb;

/// Convex shape in local space, centred on the origin.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// Capsule along the local Y axis.
    Capsule { radius: f32, half_height: f32 },
    /// Cylinder along the local Y axis.
    Cylinder { radius: f32, half_height: f32 },
    /// Convex hull of mesh vertices.
    ConvexHull { points: Vec<Vec3> },
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl ColliderShape {
    pub fn sphere(radius: f32) -> Result<Self> {
        if !positive(radius) {
            return Err(PhysicsError::InvalidShape("sphere radius must be positive"));
        }
        Ok(Self::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Result<Self> {
        if !(positive(half_extents.x) && positive(half_extents.y) && positive(half_extents.z)) {
            return Err(PhysicsError::InvalidDimensions(half_extents));
        }
        Ok(Self::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Result<Self> {
        if !positive(radius) || !(half_height.is_finite() && half_height >= 0.0) {
            return Err(PhysicsError::InvalidShape(
                "capsule needs a positive radius and non-negative half height",
            ));
        }
        Ok(Self::Capsule {
            radius,
            half_height,
        })
    }

    pub fn cylinder(radius: f32, half_height: f32) -> Result<Self> {
        if !positive(radius) || !positive(half_height) {
            return Err(PhysicsError::InvalidShape(
                "cylinder needs a positive radius and half height",
            ));
        }
        Ok(Self::Cylinder {
            radius,
            half_height,
        })
    }

    /// Hull over a mesh's vertex positions.
    pub fn convex_hull(points: Vec<Vec3>) -> Result<Self> {
        if points.is_empty() {
            return Err(PhysicsError::InvalidShape("convex hull needs at least one point"));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(PhysicsError::InvalidShape("convex hull points must be finite"));
        }
        Ok(Self::ConvexHull { points })
    }

    /// Local-space bounds (the "mesh bounds" fed to the collider's AABB).
    pub fn local_bounds(&self) -> Aabb {
        match self {
            ColliderShape::Sphere { radius } => {
                Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(*radius))
            }
            ColliderShape::Box { half_extents } => {
                Aabb::from_center_half_extents(Vec3::ZERO, *half_extents)
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => Aabb::from_center_half_extents(
                Vec3::ZERO,
                Vec3::new(*radius, *half_height + *radius, *radius),
            ),
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => Aabb::from_center_half_extents(
                Vec3::ZERO,
                Vec3::new(*radius, *half_height, *radius),
            ),
            ColliderShape::ConvexHull { points } => {
                Aabb::from_points(points).unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO))
            }
        }
    }

    /// Farthest point of the world-space shape along `direction`.
    ///
    /// For a shape transformed by a linear map `M`, the support is
    /// `M * s(Mᵀ d)`, so directions go into local space through the transpose.
    #[inline]
    pub fn support(&self, direction: Vec3, world: &Mat4) -> Vec3 {
        if let ColliderShape::ConvexHull { points } = self {
            return hull_support(points, direction, world);
        }

        let local_dir = Mat3::from_mat4(*world).transpose() * direction;
        let local_point = match self {
            ColliderShape::Sphere { radius } => local_dir.normalize_or_zero() * *radius,
            ColliderShape::Box { half_extents } => Vec3::new(
                half_extents.x.copysign(local_dir.x),
                half_extents.y.copysign(local_dir.y),
                half_extents.z.copysign(local_dir.z),
            ),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let tip = Vec3::new(0.0, half_height.copysign(local_dir.y), 0.0);
                tip + local_dir.normalize_or_zero() * *radius
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                let y = half_height.copysign(local_dir.y);
                let xz = Vec3::new(local_dir.x, 0.0, local_dir.z);
                let xz_len = xz.length();
                let rim = if xz_len > 1e-6 {
                    xz * (*radius / xz_len)
                } else {
                    Vec3::ZERO
                };
                Vec3::new(rim.x, y, rim.z)
            }
            ColliderShape::ConvexHull { .. } => unreachable!("handled above"),
        };

        world.transform_point3(local_point)
    }

    /// Origin of the shape in world space.
    #[inline]
    pub fn world_center(&self, world: &Mat4) -> Vec3 {
        world.transform_point3(Vec3::ZERO)
    }
}

/// An empty hull supports at the shape origin.
fn hull_support(points: &[Vec3], direction: Vec3, world: &Mat4) -> Vec3 {
    let Some((first, rest)) = points.split_first() else {
        return world.transform_point3(Vec3::ZERO);
    };
    let mut best = world.transform_point3(*first);
    let mut best_dot = best.dot(direction);
    for p in rest {
        let wp = world.transform_point3(*p);
        let d = wp.dot(direction);
        if d > best_dot {
            best_dot = d;
            best = wp;
        }
    }
    best
}
