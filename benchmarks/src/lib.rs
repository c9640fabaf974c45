//! Scene builders shared by the physics benchmarks.

use std::sync::Arc;

use glam::{Quat, Vec3};
use kinesis::physics::broadphase::{AnyBroadPhase, BroadPhase, ProxyId};
use kinesis::{
    Aabb, BroadPhaseKind, ColliderShape, CollisionConfig, CollisionWorld, JobSystem,
    PhysicsConfig, PhysicsManager, RigidBody, Transform,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SEED: u64 = 0x5eed;

/// Unit-ish boxes scattered through a cube whose side grows with `n`, so
/// density stays roughly constant across sizes.
pub fn random_boxes(n: usize, seed: u64) -> Vec<Aabb> {
    let mut rng = StdRng::seed_from_u64(seed);
    let side = (n as f32).cbrt() * 3.0;
    (0..n)
        .map(|_| {
            let center = Vec3::new(
                rng.gen_range(0.0..side),
                rng.gen_range(0.0..side),
                rng.gen_range(0.0..side),
            );
            let half = Vec3::new(
                rng.gen_range(0.2..1.0),
                rng.gen_range(0.2..1.0),
                rng.gen_range(0.2..1.0),
            );
            Aabb::from_center_half_extents(center, half)
        })
        .collect()
}

/// Nudge every box by a small random offset, as one frame of motion would.
pub fn jitter(boxes: &mut [Aabb], rng: &mut StdRng, amount: f32) {
    for aabb in boxes {
        let offset = Vec3::new(
            rng.gen_range(-amount..amount),
            rng.gen_range(-amount..amount),
            rng.gen_range(-amount..amount),
        );
        *aabb = Aabb::new(aabb.min + offset, aabb.max + offset);
    }
}

pub fn setup_broad_phase(kind: BroadPhaseKind, boxes: &[Aabb], jobs: Arc<dyn JobSystem>) -> AnyBroadPhase {
    let mut broad_phase = AnyBroadPhase::new(kind, 0.5, jobs);
    for (i, aabb) in boxes.iter().enumerate() {
        broad_phase.add(ProxyId(i as u32), *aabb);
    }
    broad_phase.update();
    broad_phase
}

pub fn random_points(n: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            )
        })
        .collect()
}

/// `n` mixed shapes with random poses in a collision world.
pub fn setup_collision_world(n: usize, kind: BroadPhaseKind, jobs: Arc<dyn JobSystem>) -> CollisionWorld {
    let config = CollisionConfig {
        broad_phase: kind,
        ..Default::default()
    };
    let mut world = CollisionWorld::new(config, jobs);
    let mut rng = StdRng::seed_from_u64(SEED);
    let side = (n as f32).cbrt() * 3.0;

    for i in 0..n {
        let shape = match i % 3 {
            0 => ColliderShape::sphere(0.5),
            1 => ColliderShape::cuboid(Vec3::splat(0.5)),
            _ => ColliderShape::capsule(0.3, 0.5),
        };
        let Ok(shape) = shape else { continue };
        let position = Vec3::new(
            rng.gen_range(0.0..side),
            rng.gen_range(0.0..side),
            rng.gen_range(0.0..side),
        );
        let orientation = Quat::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU));
        world.add_collider(shape, Transform::from_position_orientation(position, orientation));
    }
    world
}

/// `n` unit bodies on a grid.
pub fn setup_manager(n: usize, jobs: Arc<dyn JobSystem>) -> PhysicsManager {
    let mut manager = PhysicsManager::new(PhysicsConfig::default(), jobs);
    let row = (n as f32).sqrt().ceil() as usize;
    for i in 0..n {
        let position = Vec3::new((i % row) as f32 * 2.0, 10.0, (i / row) as f32 * 2.0);
        manager.add_body(Transform::from_position(position), RigidBody::new());
    }
    manager
}
