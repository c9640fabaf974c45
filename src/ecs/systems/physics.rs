//! Systems moving poses between hecs entities and the physics core.

use crate::ecs::components::physics::{ColliderComponent, CollisionState, PhysicsBody};
use crate::error::Result;
use crate::physics::collider::ColliderShape;
use crate::physics::collision_world::CollisionWorld;
use crate::physics::manager::PhysicsManager;
use crate::physics::rigid_body::RigidBody;
use crate::transform::Transform;

/// Spawn an entity backed by a new physics body and, if `shape` is given,
/// a collider at the same pose.
pub fn spawn_physics_entity(
    world: &mut hecs::World,
    manager: &mut PhysicsManager,
    collisions: &mut CollisionWorld,
    transform: Transform,
    rigid_body: RigidBody,
    shape: Option<ColliderShape>,
) -> hecs::Entity {
    let body = manager.add_body(transform, rigid_body);

    let mut builder = hecs::EntityBuilder::new();
    builder.add(transform).add(PhysicsBody(body));
    if let Some(shape) = shape {
        let collider = collisions.add_collider(shape, transform);
        builder
            .add(ColliderComponent(collider))
            .add(CollisionState::default());
    }
    world.spawn(builder.build())
}

/// Copy simulated poses from the manager onto entity transforms.
pub fn physics_sync_system(world: &mut hecs::World, manager: &PhysicsManager) {
    for (entity, (transform, body)) in world.query_mut::<(&mut Transform, &PhysicsBody)>() {
        match manager.body(body.0) {
            Ok(simulated) => *transform = simulated.transform,
            Err(_) => tracing::warn!(?entity, handle = ?body.0, "entity refers to a removed body"),
        }
    }
}

/// Push entity transforms into the collision world, run a collision pass
/// and write each collider's status back to its [`CollisionState`].
pub fn collision_system(world: &mut hecs::World, collisions: &mut CollisionWorld) -> Result<()> {
    for (_, (transform, collider)) in world.query::<(&Transform, &ColliderComponent)>().iter() {
        collisions.set_transform(collider.0, *transform)?;
    }

    collisions.update()?;

    for (_, (collider, state)) in world.query_mut::<(&ColliderComponent, &mut CollisionState)>() {
        state.0 = collisions.status(collider.0)?;
    }
    Ok(())
}

/// Despawn an entity and release its body and collider.
///
/// Both releases are attempted even if one fails; the first failure is
/// returned after the entity is gone. Returns `Ok(false)` if the entity was
/// already despawned.
pub fn despawn_physics_entity(
    world: &mut hecs::World,
    manager: &mut PhysicsManager,
    collisions: &mut CollisionWorld,
    entity: hecs::Entity,
) -> Result<bool> {
    let body = world.get::<&PhysicsBody>(entity).ok().map(|b| b.0);
    let collider = world.get::<&ColliderComponent>(entity).ok().map(|c| c.0);
    if world.despawn(entity).is_err() {
        return Ok(false);
    }

    let body_result = body.map_or(Ok(()), |body| manager.remove_body(body).map(drop));
    let collider_result =
        collider.map_or(Ok(()), |collider| collisions.remove_collider(collider).map(drop));
    body_result.and(collider_result)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use glam::Vec3;

    use crate::error::PhysicsError;
    use crate::jobs::{InlineExecutor, JobSystem};
    use crate::physics::aabb::CollisionStatus;
    use crate::physics::collision_world::CollisionConfig;
    use crate::physics::PhysicsConfig;

    struct Scene {
        world: hecs::World,
        manager: PhysicsManager,
        collisions: CollisionWorld,
    }

    fn scene() -> Scene {
        let jobs: Arc<dyn JobSystem> = Arc::new(InlineExecutor);
        Scene {
            world: hecs::World::new(),
            manager: PhysicsManager::new(PhysicsConfig::default(), jobs.clone()),
            collisions: CollisionWorld::new(CollisionConfig::default(), jobs),
        }
    }

    fn spawn_sphere(scene: &mut Scene, position: Vec3) -> hecs::Entity {
        spawn_physics_entity(
            &mut scene.world,
            &mut scene.manager,
            &mut scene.collisions,
            Transform::from_position(position),
            RigidBody::new(),
            Some(ColliderShape::sphere(0.5).unwrap()),
        )
    }

    fn state(scene: &Scene, entity: hecs::Entity) -> CollisionStatus {
        scene.world.get::<&CollisionState>(entity).unwrap().0
    }

    #[test]
    fn test_sync_copies_simulated_pose() {
        let mut scene = scene();
        let entity = spawn_sphere(&mut scene, Vec3::ZERO);

        scene.manager.step_simulation(1.0).unwrap();
        physics_sync_system(&mut scene.world, &scene.manager);

        let transform = *scene.world.get::<&Transform>(entity).unwrap();
        let eps = 1e-5;
        assert!((transform.position() - Vec3::new(0.0, -9.81, 0.0)).length() < eps);
    }

    #[test]
    fn test_collision_system_writes_states() {
        let mut scene = scene();
        let a = spawn_sphere(&mut scene, Vec3::ZERO);
        let b = spawn_sphere(&mut scene, Vec3::new(0.6, 0.0, 0.0));
        let c = spawn_sphere(&mut scene, Vec3::new(10.0, 0.0, 0.0));

        collision_system(&mut scene.world, &mut scene.collisions).unwrap();
        assert_eq!(state(&scene, a), CollisionStatus::Colliding);
        assert_eq!(state(&scene, b), CollisionStatus::Colliding);
        assert_eq!(state(&scene, c), CollisionStatus::NoCollision);

        // Moving the entity moves the collider.
        *scene.world.get::<&mut Transform>(b).unwrap() =
            Transform::from_position(Vec3::new(10.5, 0.0, 0.0));
        collision_system(&mut scene.world, &mut scene.collisions).unwrap();
        assert_eq!(state(&scene, a), CollisionStatus::NoCollision);
        assert!(scene.world.get::<&CollisionState>(c).unwrap().is_colliding());
    }

    #[test]
    fn test_body_without_collider() {
        let mut scene = scene();
        let entity = spawn_physics_entity(
            &mut scene.world,
            &mut scene.manager,
            &mut scene.collisions,
            Transform::identity(),
            RigidBody::new(),
            None,
        );
        assert!(scene.world.get::<&ColliderComponent>(entity).is_err());
        assert!(scene.collisions.is_empty());
        collision_system(&mut scene.world, &mut scene.collisions).unwrap();
    }

    #[test]
    fn test_despawn_with_stale_body_still_releases_collider() {
        let mut scene = scene();
        let entity = spawn_sphere(&mut scene, Vec3::ZERO);
        let body = scene.world.get::<&PhysicsBody>(entity).unwrap().0;
        scene.manager.remove_body(body).unwrap();

        let result = despawn_physics_entity(
            &mut scene.world,
            &mut scene.manager,
            &mut scene.collisions,
            entity,
        );
        assert!(matches!(result, Err(PhysicsError::UnknownBody(h)) if h == body));
        assert!(!scene.world.contains(entity));
        assert!(scene.collisions.is_empty());
    }

    #[test]
    fn test_despawn_releases_body_and_collider() {
        let mut scene = scene();
        let entity = spawn_sphere(&mut scene, Vec3::ZERO);
        let other = spawn_sphere(&mut scene, Vec3::X * 5.0);
        let body = scene.world.get::<&PhysicsBody>(entity).unwrap().0;

        let removed = despawn_physics_entity(
            &mut scene.world,
            &mut scene.manager,
            &mut scene.collisions,
            entity,
        )
        .unwrap();
        assert!(removed);
        assert!(!scene.world.contains(entity));
        assert!(scene.manager.body(body).is_err());
        assert_eq!(scene.manager.len(), 1);
        assert_eq!(scene.collisions.len(), 1);

        // The spatial index no longer offers the despawned body.
        let other_body = scene.world.get::<&PhysicsBody>(other).unwrap().0;
        assert_eq!(scene.manager.nearest_body(Vec3::ZERO, None).unwrap().0, other_body);

        let again = despawn_physics_entity(
            &mut scene.world,
            &mut scene.manager,
            &mut scene.collisions,
            entity,
        )
        .unwrap();
        assert!(!again);
    }
}
