//! Headless demo: a ground slab and a stack of falling boxes, run once per
//! broad-phase strategy with collision counts logged along the way.
//!
//! Usage: kinesis-app [frames]

use std::sync::Arc;

use glam::{Quat, Vec3};
use kinesis::physics::CollisionDebugFlags;
use kinesis::{
    BroadPhaseKind, ColliderShape, CollisionConfig, CollisionState, CollisionWorld, DebugLines,
    JobSystem, PhysicsConfig, PhysicsDebugFlags, PhysicsManager, RigidBody, ThreadPool, Transform,
    collision_system, physics_sync_system, spawn_physics_entity,
};

const DEFAULT_FRAMES: u32 = 240;
const FRAME_DT: f64 = 1.0 / 60.0;
const BOX_COLUMNS: usize = 6;
const BOX_LAYERS: usize = 5;

struct DemoApp {
    world: hecs::World,
    manager: PhysicsManager,
    collisions: CollisionWorld,
}

impl DemoApp {
    fn new(kind: BroadPhaseKind, jobs: Arc<dyn JobSystem>) -> anyhow::Result<Self> {
        let physics_config = PhysicsConfig {
            debug: PhysicsDebugFlags {
                draw_bodies: true,
                draw_spatial_index: false,
            },
            ..Default::default()
        };
        let collision_config = CollisionConfig {
            broad_phase: kind,
            debug: CollisionDebugFlags {
                draw_aabbs: true,
                draw_broad_phase: false,
            },
            ..Default::default()
        };
        let mut app = Self {
            world: hecs::World::new(),
            manager: PhysicsManager::new(physics_config, jobs.clone()),
            collisions: CollisionWorld::new(collision_config, jobs),
        };
        app.init()?;
        Ok(app)
    }

    fn init(&mut self) -> anyhow::Result<()> {
        // Ground
        let ground_half = Vec3::new(20.0, 0.5, 20.0);
        let mut ground = RigidBody::with_mass_and_dimensions(1000.0, ground_half * 2.0)?;
        ground.gravity_affected = false;
        spawn_physics_entity(
            &mut self.world,
            &mut self.manager,
            &mut self.collisions,
            Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
            ground,
            Some(ColliderShape::cuboid(ground_half)?),
        );

        // Falling boxes, each layer slightly rotated and spun
        for layer in 0..BOX_LAYERS {
            for column in 0..BOX_COLUMNS {
                let position = Vec3::new(
                    column as f32 * 1.5 - 4.0,
                    2.0 + layer as f32 * 1.2,
                    (layer % 2) as f32 * 0.5,
                );
                let orientation = Quat::from_rotation_y(layer as f32 * 0.3);
                let mut body = RigidBody::with_mass_and_dimensions(1.0, Vec3::ONE)?;
                body.apply_torque(Vec3::new(0.0, 0.05 * column as f32, 0.0));
                spawn_physics_entity(
                    &mut self.world,
                    &mut self.manager,
                    &mut self.collisions,
                    Transform::from_position_orientation(position, orientation),
                    body,
                    Some(ColliderShape::cuboid(Vec3::splat(0.5))?),
                );
            }
        }
        Ok(())
    }

    fn update(&mut self) -> anyhow::Result<usize> {
        self.manager.update(FRAME_DT)?;
        physics_sync_system(&mut self.world, &self.manager);
        collision_system(&mut self.world, &mut self.collisions)?;

        let colliding = self
            .world
            .query_mut::<&CollisionState>()
            .into_iter()
            .filter(|(_, state)| state.is_colliding())
            .count();
        Ok(colliding)
    }

    fn debug_lines(&self) -> DebugLines {
        let mut lines = DebugLines::new();
        self.manager.debug_draw(&mut lines);
        self.collisions.debug_draw(&mut lines);
        lines
    }
}

fn run(kind: BroadPhaseKind, frames: u32, jobs: Arc<dyn JobSystem>) -> anyhow::Result<()> {
    let mut app = DemoApp::new(kind, jobs)?;
    let mut broad_checks = 0usize;
    let mut narrow_checks = 0usize;

    for frame in 0..frames {
        let colliding = app.update()?;
        broad_checks += app.collisions.broad_phase_checks();
        narrow_checks += app.collisions.narrow_phase_checks();
        if frame % 60 == 0 {
            log::info!(
                "[{kind:?}] frame {frame}: {} candidates, {} collisions, {colliding} colliding entities",
                app.collisions.candidate_pairs().len(),
                app.collisions.collisions().len(),
            );
        }
    }

    let lines = app.debug_lines();
    log::info!(
        "[{kind:?}] done: {broad_checks} broad-phase checks, {narrow_checks} GJK checks, {} debug lines ({} bytes)",
        lines.line_count(),
        lines.as_bytes().len(),
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let frames = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_FRAMES,
    };

    let jobs: Arc<dyn JobSystem> = Arc::new(ThreadPool::with_available_parallelism());
    log::info!("kinesis demo: {frames} frames on {} workers", jobs.worker_count());

    for kind in [
        BroadPhaseKind::BruteForce,
        BroadPhaseKind::Bvh,
        BroadPhaseKind::SortAndSweep,
    ] {
        run(kind, frames, jobs.clone())?;
    }
    Ok(())
}
