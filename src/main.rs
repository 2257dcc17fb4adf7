//! Demo driver: runs a small world against the in-memory core
//!
//! Usage: `voxel-physics-bridge [settings.json]`

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use glam::{DVec3, IVec3};

use voxel_physics_bridge::consts::{GRAVITY, TICK_DT};
use voxel_physics_bridge::native::materials;
use voxel_physics_bridge::wire::{
    BodyShapeUpdates, DenseVoxels, LocalVoxelPos, REGION_EDGE, RigidBodyInertia, RigidBodyTransform,
    VoxelShapeUpdate,
};
use voxel_physics_bridge::{MemoryCore, Result, VoxelBodyDesc, WorldHandle, WorldSettings};

const TICKS: u32 = 40;

fn run(settings: &WorldSettings) -> Result<()> {
    let core = Rc::new(MemoryCore::new().with_relocation_seed(0x5eed));
    let world = WorldHandle::create(core.clone())?;
    world.apply_settings(settings)?;

    let desc = VoxelBodyDesc::new(IVec3::ZERO, IVec3::splat(15));
    let bodies = (0..4)
        .map(|_| world.create_voxel_body(&desc))
        .collect::<Result<Vec<_>>>()?;

    // One solid 16x16 floor layer per body
    let mut floor = DenseVoxels::new();
    for x in 0..16 {
        for z in 0..16 {
            if let Some(pos) = LocalVoxelPos::new(x, 0, z) {
                floor.set(pos, materials::SOLID);
            }
        }
    }
    let batches: Vec<_> = bodies
        .iter()
        .map(|body| {
            let update = VoxelShapeUpdate::dense(IVec3::ZERO, false, floor.clone());
            BodyShapeUpdates::new(body.id(), vec![update])
        })
        .collect();
    world.queue_voxel_shape_updates(&batches)?;
    world.tick(GRAVITY, TICK_DT, false)?;

    // Side by side, the first one a fixed ground plate
    for (i, body) in bodies.iter().enumerate() {
        let x = i as f64 * 2.0 * REGION_EDGE as f64;
        body.set_transform(&RigidBodyTransform::from_position(DVec3::new(x, 0.0, 0.0)))?;
        body.set_voxel_terrain_fully_loaded(true)?;
    }
    bodies[0].set_static(true)?;
    bodies[0].set_inertia(&RigidBodyInertia::immovable())?;

    for tick in 0..TICKS {
        if tick == TICKS / 2 {
            let removed = world.delete_body(bodies[1].id())?;
            log::info!("Deleted body {}: {removed}", bodies[1].id());
        }
        world.tick(GRAVITY, TICK_DT, true)?;
    }

    for body in &bodies {
        if body.has_been_deleted() {
            log::info!("Body {} deleted", body.id());
            continue;
        }
        let transform = body.transform()?;
        log::info!(
            "Body {} at {:.3} (slot {}), aabb {:?}",
            body.id(),
            transform.position,
            body.index_hint().0,
            body.aabb()?,
        );
    }

    let stats = core.stats();
    log::info!(
        "{} core calls, {} resolves, {} hint misses",
        stats.calls,
        stats.resolve_calls,
        stats.hint_misses
    );

    world.delete();
    let survivors = bodies.iter().filter(|b| !b.has_been_deleted()).count();
    log::info!("After world deletion {survivors} bodies remain live");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Voxel physics bridge demo starting...");

    let settings = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => WorldSettings::load_or_default(&path),
        None => WorldSettings::default(),
    };

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}
