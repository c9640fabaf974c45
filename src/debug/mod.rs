//! Debug drawing of physics state as line lists.
//!
//! The physics code never talks to a renderer directly. It emits box draw
//! requests through the [`DebugDraw`] trait; [`DebugLines`] is a collector
//! that turns them into a `Pod` vertex list ready for upload.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::physics::aabb::{Aabb, CollisionStatus};

/// RGBA color.
pub type Color = [f32; 4];

pub const GREEN: Color = [0.0, 1.0, 0.0, 1.0];
pub const YELLOW: Color = [1.0, 1.0, 0.0, 1.0];
pub const RED: Color = [1.0, 0.0, 0.0, 1.0];
pub const CYAN: Color = [0.0, 1.0, 1.0, 1.0];
pub const MAGENTA: Color = [1.0, 0.0, 1.0, 1.0];
pub const WHITE: Color = [1.0, 1.0, 1.0, 1.0];

/// Color for a collider's bounds given its last collision status.
pub fn status_color(status: CollisionStatus) -> Color {
    match status {
        CollisionStatus::NoCollision => GREEN,
        CollisionStatus::Potential => YELLOW,
        CollisionStatus::Colliding => RED,
    }
}

/// Receiver of debug draw requests.
pub trait DebugDraw {
    /// Draw `aabb` (in the local space of `transform`) as a wireframe box.
    fn draw_box(&mut self, aabb: &Aabb, color: Color, transform: &Mat4);
}

/// Position + color vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DebugVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl DebugVertex {
    pub const fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }
}

/// Corner index pairs of the 12 box edges, for corners in [`Aabb::corners`] order.
const BOX_EDGES: [(usize, usize); 12] = [
    // Bottom face
    (0, 1),
    (1, 3),
    (3, 2),
    (2, 0),
    // Top face
    (4, 5),
    (5, 7),
    (7, 6),
    (6, 4),
    // Vertical edges
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Line-list collector (2 vertices per segment).
#[derive(Debug, Default, Clone)]
pub struct DebugLines {
    vertices: Vec<DebugVertex>,
}

impl DebugLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, from: Vec3, to: Vec3, color: Color) {
        self.vertices.push(DebugVertex::new(from.to_array(), color));
        self.vertices.push(DebugVertex::new(to.to_array(), color));
    }

    pub fn vertices(&self) -> &[DebugVertex] {
        &self.vertices
    }

    /// Raw bytes of the vertex list.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn line_count(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

impl DebugDraw for DebugLines {
    fn draw_box(&mut self, aabb: &Aabb, color: Color, transform: &Mat4) {
        let corners = aabb.corners().map(|c| transform.transform_point3(c));
        self.vertices.reserve(BOX_EDGES.len() * 2);
        for (i, j) in BOX_EDGES {
            self.line(corners[i], corners[j], color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_is_twelve_lines() {
        let mut lines = DebugLines::new();
        lines.draw_box(&Aabb::new(Vec3::ZERO, Vec3::ONE), WHITE, &Mat4::IDENTITY);
        assert_eq!(lines.line_count(), 12);
        assert_eq!(lines.vertices().len(), 24);
        assert_eq!(
            lines.as_bytes().len(),
            24 * std::mem::size_of::<DebugVertex>()
        );
    }

    #[test]
    fn test_box_is_transformed() {
        let mut lines = DebugLines::new();
        let transform = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        lines.draw_box(&Aabb::new(Vec3::ZERO, Vec3::ONE), RED, &transform);
        assert!(lines
            .vertices()
            .iter()
            .all(|v| v.position[0] >= 10.0 && v.position[0] <= 11.0));
        assert!(lines.vertices().iter().all(|v| v.color == RED));
    }

    #[test]
    fn test_status_colors_differ() {
        assert_ne!(
            status_color(CollisionStatus::NoCollision),
            status_color(CollisionStatus::Colliding)
        );
        assert_eq!(status_color(CollisionStatus::Potential), YELLOW);
    }
}
