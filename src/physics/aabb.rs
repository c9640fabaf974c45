//! Axis-aligned bounding boxes and per-collider bounds.

use glam::{Mat4, Vec3};

use crate::error::{PhysicsError, Result};

/// Axis-aligned bounding box. Overlap and containment tests are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a box from corners that are already ordered.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a box from explicit corners, rejecting `min > max` on any axis.
    pub fn try_new(min: Vec3, max: Vec3) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min.cmpgt(max).any() {
            return Err(PhysicsError::InvertedBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half_extents = half_extents.abs();
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box enclosing all points. Returns `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Self::new(*first, *first);
        for p in rest {
            aabb.min = aabb.min.min(*p);
            aabb.max = aabb.max.max(*p);
        }
        Some(aabb)
    }

    /// Test whether two AABBs overlap.
    #[inline]
    pub fn collides(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// True when `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Componentwise union of two boxes.
    #[inline]
    pub fn merge(a: &Aabb, b: &Aabb) -> Aabb {
        Aabb {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.extents() * 0.5
    }

    /// Product of the extents.
    #[inline]
    pub fn volume(&self) -> f32 {
        let e = self.extents();
        e.x * e.y * e.z
    }

    /// Grow the box by `margin` on every side.
    #[inline]
    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Lower bound on one axis (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn min_on(&self, axis: usize) -> f32 {
        self.min[axis]
    }

    #[inline]
    pub fn max_on(&self, axis: usize) -> f32 {
        self.max[axis]
    }

    /// The 8 corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z), // 0: ---
            Vec3::new(max.x, min.y, min.z), // 1: +--
            Vec3::new(min.x, max.y, min.z), // 2: -+-
            Vec3::new(max.x, max.y, min.z), // 3: ++-
            Vec3::new(min.x, min.y, max.z), // 4: --+
            Vec3::new(max.x, min.y, max.z), // 5: +-+
            Vec3::new(min.x, max.y, max.z), // 6: -++
            Vec3::new(max.x, max.y, max.z), // 7: +++
        ]
    }

    /// World-space box enclosing this box after an affine transform.
    pub fn transformed(&self, mat: &Mat4) -> Aabb {
        bounds_of_transformed(&self.corners(), mat)
    }
}

fn bounds_of_transformed(corners: &[Vec3; 8], mat: &Mat4) -> Aabb {
    let first = mat.transform_point3(corners[0]);
    let mut aabb = Aabb::new(first, first);
    for corner in &corners[1..] {
        let p = mat.transform_point3(*corner);
        aabb.min = aabb.min.min(p);
        aabb.max = aabb.max.max(p);
    }
    aabb
}

/// Result of the most recent collision pass for one collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollisionStatus {
    /// No broad-phase candidate involved this collider.
    #[default]
    NoCollision,
    /// The broad phase paired it with something; not confirmed.
    Potential,
    /// The narrow phase confirmed an intersection.
    Colliding,
}

/// World-space bounds of one collider, derived from its local mesh bounds.
///
/// The 8 local corners are cached at construction; [`ColliderBounds::recalculate`]
/// pushes them through the owner's world matrix and keeps the extrema.
#[derive(Debug, Clone)]
pub struct ColliderBounds {
    local_corners: [Vec3; 8],
    world: Aabb,
    pub status: CollisionStatus,
}

impl ColliderBounds {
    /// Bounds from the mesh's local-space box.
    pub fn from_local(local: Aabb) -> Self {
        Self {
            local_corners: local.corners(),
            world: local,
            status: CollisionStatus::NoCollision,
        }
    }

    /// Bounds from explicit local min/max corners.
    pub fn from_min_max(min: Vec3, max: Vec3) -> Result<Self> {
        Ok(Self::from_local(Aabb::try_new(min, max)?))
    }

    /// Recompute the world AABB from the owner's world matrix.
    pub fn recalculate(&mut self, world_matrix: &Mat4) {
        self.world = bounds_of_transformed(&self.local_corners, world_matrix);
    }

    /// Current world-space box.
    #[inline]
    pub fn aabb(&self) -> Aabb {
        self.world
    }

    pub fn local_corners(&self) -> &[Vec3; 8] {
        &self.local_corners
    }

    pub fn collides(&self, other: &ColliderBounds) -> bool {
        self.world.collides(&other.world)
    }
}
