//! Stale-handle behaviour driven through the public API

use std::rc::Rc;

use glam::{DVec3, IVec3};
use proptest::prelude::*;

use voxel_physics_bridge::native::CoreLimits;
use voxel_physics_bridge::{
    BodyHandle, BodyId, BridgeError, MemoryCore, VoxelBodyDesc, WorldHandle, WorldSettings,
};

fn desc() -> VoxelBodyDesc {
    VoxelBodyDesc::new(IVec3::ZERO, IVec3::splat(15))
}

#[test]
fn test_create_and_delete_body_zero() {
    let world = WorldHandle::create(Rc::new(MemoryCore::new())).unwrap();
    let body = world.create_voxel_body(&desc()).unwrap();
    assert_eq!(body.id(), BodyId(0));
    assert!(!body.has_been_deleted());

    assert!(world.delete_body(BodyId(0)).unwrap());
    assert!(body.has_been_deleted());
    assert!(!world.delete_body(BodyId(0)).unwrap());
}

#[test]
fn test_world_deletion_cascades_to_every_body() {
    let world = WorldHandle::create(Rc::new(MemoryCore::new())).unwrap();
    let bodies: Vec<BodyHandle> = (0..5)
        .map(|_| world.create_voxel_body(&desc()).unwrap())
        .collect();

    world.delete();
    world.delete();

    for body in &bodies {
        assert!(body.has_been_deleted());
        assert!(matches!(
            body.set_velocity(DVec3::X),
            Err(BridgeError::StaleReference { .. })
        ));
    }
}

#[test]
fn test_deletion_is_monotonic_even_if_id_lookup_would_succeed() {
    let core = Rc::new(MemoryCore::new());
    let world = WorldHandle::create(core.clone()).unwrap();
    let body = world.create_voxel_body(&desc()).unwrap();
    let other = world.create_voxel_body(&desc()).unwrap();

    world.delete_body(body.id()).unwrap();
    assert!(body.has_been_deleted());

    // Plenty of activity after the fact
    for _ in 0..10 {
        world.create_voxel_body(&desc()).unwrap();
        world.tick(DVec3::ZERO, 0.05, true).unwrap();
    }
    assert!(!other.has_been_deleted());
    assert!(body.has_been_deleted());
}

#[test]
fn test_reattached_handle_sees_deletion() {
    let world = WorldHandle::create(Rc::new(MemoryCore::new())).unwrap();
    let body = world.create_voxel_body(&desc()).unwrap();
    let again = world.body(body.id());
    assert!(!again.has_been_deleted());

    world.delete_body(body.id()).unwrap();
    assert!(again.has_been_deleted());
    assert!(world.body(BodyId(42)).has_been_deleted());
}

#[test]
fn test_resource_exhaustion_is_reported() {
    let core = Rc::new(MemoryCore::with_limits(CoreLimits {
        max_worlds: 1,
        max_bodies_per_world: 2,
    }));
    let world = WorldHandle::create(core.clone()).unwrap();
    assert!(matches!(
        WorldHandle::create(core.clone()),
        Err(BridgeError::ResourceExhausted { .. })
    ));

    world.create_voxel_body(&desc()).unwrap();
    world.create_voxel_body(&desc()).unwrap();
    assert!(matches!(
        world.create_voxel_body(&desc()),
        Err(BridgeError::ResourceExhausted { .. })
    ));
}

#[test]
fn test_unknown_settings_solver_is_invalid() {
    let err = WorldSettings::from_json(r#"{ "solver_type": "newton" }"#).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
}

proptest! {
    /// Under random deletions and shuffled storage, every live handle keeps
    /// reading its own body and every deleted one stays deleted.
    #[test]
    fn test_handles_track_bodies_through_relocation(
        seed in any::<u64>(),
        ops in prop::collection::vec((any::<bool>(), 0usize..16), 1..40),
    ) {
        let core = Rc::new(MemoryCore::new().with_relocation_seed(seed));
        let world = WorldHandle::create(core.clone()).unwrap();

        let mut bodies: Vec<(BodyHandle, bool)> = Vec::new();
        for (delete, pick) in ops {
            if delete && !bodies.is_empty() {
                let len = bodies.len();
                let (body, alive) = &mut bodies[pick % len];
                let removed = world.delete_body(body.id()).unwrap();
                prop_assert_eq!(removed, *alive);
                *alive = false;
            } else {
                let body = world.create_voxel_body(&desc()).unwrap();
                // Tag each body with its id so reads can be checked
                body.set_restitution(body.id().0 as f64).unwrap();
                bodies.push((body, true));
            }
            world.tick(DVec3::ZERO, 0.05, false).unwrap();

            for (body, alive) in &bodies {
                prop_assert_eq!(body.has_been_deleted(), !*alive);
                if *alive {
                    prop_assert_eq!(body.restitution().unwrap(), body.id().0 as f64);
                }
            }
        }
    }
}
