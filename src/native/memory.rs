//! In-process implementation of [`NativeCore`]
//!
//! Bodies are kept in a dense `Vec` per world. Deleting a body swap-removes
//! it, which moves the last body into the freed slot; with a relocation seed
//! the storage is also shuffled after every tick. Handles that cached an old
//! index must heal through `resolve_body_index`.
//!
//! The integrator is a plain sub-stepped semi-implicit Euler without
//! collision response; it exists so state visibly changes across ticks.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use glam::{DMat3, DQuat, DVec3, IVec3};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_pcg::Pcg32;

use super::terrain::VoxelTerrain;
use super::{
    BodyFlag, BodyId, BodyIndex, BodyScalar, BodyVector, DAabb, IAabb, Load, NativeCore,
    NativeSettings, QueuedLoads, VoxelBodyDesc, VoxelState, WorldId,
};
use crate::error::{BridgeError, Resource, Result};
use crate::settings::SolverType;
use crate::wire::{
    BodyShapeUpdates, INERTIA_TENSOR_BYTES, RigidBodyInertia, RigidBodyTransform, TRANSFORM_BYTES,
    VoxelShapeUpdate, decode_inertia, decode_shape_updates, decode_transform, encode_inertia,
    encode_transform,
};

/// Allocation limits; exceeding them yields `ResourceExhausted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLimits {
    pub max_worlds: usize,
    pub max_bodies_per_world: usize,
}

impl Default for CoreLimits {
    fn default() -> Self {
        Self {
            max_worlds: 64,
            max_bodies_per_world: 1 << 16,
        }
    }
}

/// Call counters, for observing the handle protocol from tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    /// Every call through [`NativeCore`]
    pub calls: u64,
    pub resolve_calls: u64,
    /// Resolves where the caller's hint was wrong
    pub hint_misses: u64,
}

#[derive(Debug, Clone)]
struct BodyRecord {
    id: BodyId,
    transform: RigidBodyTransform,
    inertia: RigidBodyInertia,
    velocity: DVec3,
    omega: DVec3,
    collision_shape_offset: DVec3,
    collision_shape_scaling: f64,
    dynamic_friction: f64,
    static_friction: f64,
    restitution: f64,
    is_static: bool,
    terrain_loaded: bool,
    loads: QueuedLoads,
    terrain: VoxelTerrain,
}

impl BodyRecord {
    fn new(id: BodyId, desc: &VoxelBodyDesc) -> Self {
        Self {
            id,
            transform: RigidBodyTransform::default(),
            inertia: RigidBodyInertia::unit(),
            velocity: DVec3::ZERO,
            omega: DVec3::ZERO,
            collision_shape_offset: DVec3::ZERO,
            collision_shape_scaling: 1.0,
            dynamic_friction: 0.5,
            static_friction: 1.0,
            restitution: 0.5,
            is_static: false,
            terrain_loaded: false,
            loads: QueuedLoads::default(),
            terrain: VoxelTerrain::new(desc),
        }
    }

    fn moves(&self) -> bool {
        !self.is_static && self.terrain_loaded
    }

    /// Net world-frame force and torque from the queued loads
    fn net_load(&self) -> (DVec3, DVec3) {
        let rotation = self.transform.rotation;
        let loads = &self.loads;
        let mut force = loads.invariant_force + rotation * loads.rot_dependent_force;
        let mut torque = loads.invariant_torque + rotation * loads.rot_dependent_torque;
        for (local_pos, f) in &loads.invariant_forces_at_pos {
            force += *f;
            torque += (rotation * *local_pos).cross(*f);
        }
        (force, torque)
    }

    fn integrate(&mut self, gravity: DVec3, force: DVec3, torque: DVec3, h: f64) {
        let rotation = DMat3::from_quat(self.transform.rotation);
        let inv_moi_world = rotation * self.inertia.inv_moi * rotation.transpose();

        self.velocity += (gravity + force * self.inertia.inv_mass) * h;
        self.omega += inv_moi_world * torque * h;

        self.transform.position += self.velocity * h;
        let q = self.transform.rotation;
        let spin = DQuat::from_xyzw(self.omega.x, self.omega.y, self.omega.z, 0.0) * q;
        self.transform.rotation = (q + spin * (0.5 * h)).normalize();
    }

    fn world_aabb(&self) -> Option<DAabb> {
        let bounds = self.terrain.solid_bounds()?;
        let lo = bounds.min.as_dvec3();
        let hi = (bounds.max + IVec3::ONE).as_dvec3();

        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for i in 0..8 {
            let corner = DVec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            );
            let local = (corner + self.collision_shape_offset) * self.collision_shape_scaling;
            let world = self.transform.position + self.transform.rotation * local;
            min = min.min(world);
            max = max.max(world);
        }
        Some(DAabb { min, max })
    }
}

#[derive(Debug)]
struct WorldState {
    bodies: Vec<BodyRecord>,
    slots: HashMap<BodyId, usize>,
    next_body_id: i32,
    sub_steps: u32,
    solver: SolverType,
    /// Voxel updates waiting for the next tick, in submission order
    pending: Vec<(BodyId, VoxelShapeUpdate)>,
    ticks: u64,
    rng: Option<Pcg32>,
}

impl WorldState {
    fn new(relocation_seed: Option<u64>) -> Self {
        Self {
            bodies: Vec::new(),
            slots: HashMap::new(),
            next_body_id: 0,
            sub_steps: 20,
            solver: SolverType::Jacobi,
            pending: Vec::new(),
            ticks: 0,
            rng: relocation_seed.map(Pcg32::seed_from_u64),
        }
    }

    /// Slot of `body`, trusting `hint` only if it checks out
    fn locate(&self, body: BodyId, hint: BodyIndex) -> Option<usize> {
        if let Some(slot) = hint.slot() {
            if self.bodies.get(slot).is_some_and(|b| b.id == body) {
                return Some(slot);
            }
        }
        self.slots.get(&body).copied()
    }

    fn reindex(&mut self) {
        self.slots.clear();
        for (slot, body) in self.bodies.iter().enumerate() {
            self.slots.insert(body.id, slot);
        }
    }

    fn apply_update(&mut self, body: BodyId, update: &VoxelShapeUpdate) {
        match self.slots.get(&body) {
            Some(&slot) => self.bodies[slot].terrain.apply(update),
            None => log::warn!("Dropping voxel update for unknown body {body}"),
        }
    }

    /// Applies queued updates for `body` (or all bodies) in order
    fn flush_pending(&mut self, body: Option<BodyId>) {
        let pending = std::mem::take(&mut self.pending);
        let (ready, keep): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(id, _)| body.is_none_or(|b| b == *id));
        self.pending = keep;
        for (id, update) in &ready {
            self.apply_update(*id, update);
        }
    }

    fn receive(&mut self, batches: Vec<BodyShapeUpdates>) {
        for batch in batches {
            for update in batch.updates {
                if update.run_immediately {
                    // Earlier queued records for this body go first
                    self.flush_pending(Some(batch.body_id));
                    self.apply_update(batch.body_id, &update);
                } else {
                    self.pending.push((batch.body_id, update));
                }
            }
        }
    }

    fn step(&mut self, gravity: DVec3, dt: f64) {
        let sub_steps = self.sub_steps.max(1);
        let h = dt / sub_steps as f64;
        for body in self.bodies.iter_mut().filter(|b| b.moves()) {
            let (force, torque) = body.net_load();
            for _ in 0..sub_steps {
                body.integrate(gravity, force, torque, h);
            }
        }
        for body in &mut self.bodies {
            body.loads = QueuedLoads::default();
        }
    }

    fn relocate(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.bodies.shuffle(rng);
            self.reindex();
        }
    }
}

/// Reference [`NativeCore`] living entirely in host memory
///
/// Body field calls panic if the body is missing: callers must resolve the
/// index first, as [`crate::BodyHandle`] does.
#[derive(Debug, Default)]
pub struct MemoryCore {
    limits: CoreLimits,
    relocation_seed: Option<u64>,
    worlds: RefCell<HashMap<WorldId, WorldState>>,
    next_world: Cell<u64>,
    stats: Cell<CoreStats>,
}

impl MemoryCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: CoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Shuffle body storage after every tick, deterministically per seed
    pub fn with_relocation_seed(mut self, seed: u64) -> Self {
        self.relocation_seed = Some(seed);
        self
    }

    pub fn stats(&self) -> CoreStats {
        self.stats.get()
    }

    pub fn live_worlds(&self) -> usize {
        self.worlds.borrow().len()
    }

    /// Number of bodies currently stored in `world`
    pub fn body_count(&self, world: WorldId) -> usize {
        self.worlds.borrow().get(&world).map_or(0, |w| w.bodies.len())
    }

    /// Current storage slot of `body`, bypassing any hint
    pub fn slot_of(&self, world: WorldId, body: BodyId) -> Option<usize> {
        self.worlds.borrow().get(&world)?.slots.get(&body).copied()
    }

    pub fn solver(&self, world: WorldId) -> Option<SolverType> {
        self.worlds.borrow().get(&world).map(|w| w.solver)
    }

    pub fn ticks(&self, world: WorldId) -> u64 {
        self.worlds.borrow().get(&world).map_or(0, |w| w.ticks)
    }

    fn count_call(&self) {
        let mut stats = self.stats.get();
        stats.calls += 1;
        self.stats.set(stats);
    }

    fn with_world<R>(&self, world: WorldId, f: impl FnOnce(&mut WorldState) -> R) -> Option<R> {
        self.count_call();
        self.worlds.borrow_mut().get_mut(&world).map(f)
    }

    fn with_body<R>(
        &self,
        world: WorldId,
        body: BodyId,
        hint: BodyIndex,
        f: impl FnOnce(&mut BodyRecord) -> R,
    ) -> R {
        self.count_call();
        let mut worlds = self.worlds.borrow_mut();
        let Some(state) = worlds.get_mut(&world) else {
            panic!("physics world {world} does not exist");
        };
        let Some(slot) = state.locate(body, hint) else {
            panic!("rigid body {body} does not exist in physics world {world}");
        };
        f(&mut state.bodies[slot])
    }
}

impl NativeCore for MemoryCore {
    fn create_world(&self) -> Result<WorldId> {
        self.count_call();
        let mut worlds = self.worlds.borrow_mut();
        if worlds.len() >= self.limits.max_worlds {
            return Err(BridgeError::ResourceExhausted {
                resource: Resource::World,
            });
        }
        // 0 is never handed out
        let id = WorldId::from_raw(self.next_world.get() + 1);
        self.next_world.set(id.raw());
        worlds.insert(id, WorldState::new(self.relocation_seed));
        Ok(id)
    }

    fn delete_world(&self, world: WorldId) {
        self.count_call();
        self.worlds.borrow_mut().remove(&world);
    }

    fn create_voxel_body(&self, world: WorldId, desc: &VoxelBodyDesc) -> Result<BodyId> {
        let max_bodies = self.limits.max_bodies_per_world;
        self.with_world(world, |state| {
            if state.bodies.len() >= max_bodies || state.next_body_id == i32::MAX {
                return Err(BridgeError::ResourceExhausted {
                    resource: Resource::Body,
                });
            }
            let id = BodyId(state.next_body_id);
            state.next_body_id += 1;
            state.slots.insert(id, state.bodies.len());
            state.bodies.push(BodyRecord::new(id, desc));
            Ok(id)
        })
        .unwrap_or(Err(BridgeError::stale_world(world)))
    }

    fn delete_body(&self, world: WorldId, body: BodyId) -> bool {
        self.with_world(world, |state| {
            let Some(slot) = state.slots.remove(&body) else {
                return false;
            };
            state.bodies.swap_remove(slot);
            state.pending.retain(|(id, _)| *id != body);
            if let Some(moved) = state.bodies.get(slot) {
                state.slots.insert(moved.id, slot);
            }
            true
        })
        .unwrap_or(false)
    }

    fn resolve_body_index(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> BodyIndex {
        let resolved = self
            .with_world(world, |state| state.locate(body, hint))
            .flatten()
            .map_or(BodyIndex::DELETED, |slot| BodyIndex(slot as i32));

        let mut stats = self.stats.get();
        stats.resolve_calls += 1;
        if resolved != hint {
            stats.hint_misses += 1;
        }
        self.stats.set(stats);
        resolved
    }

    fn apply_settings(&self, world: WorldId, settings: &NativeSettings) -> Result<()> {
        let solver = SolverType::parse(&settings.solver_name)?;
        let sub_steps = u32::try_from(settings.sub_steps)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                BridgeError::InvalidArgument(format!("sub_steps {} must be positive", settings.sub_steps))
            })?;
        self.with_world(world, |state| {
            state.solver = solver;
            state.sub_steps = sub_steps;
        })
        .ok_or(BridgeError::stale_world(world))
    }

    fn advance_time(&self, world: WorldId, gravity: DVec3, dt: f64, simulate: bool) {
        let ticked = self.with_world(world, |state| {
            state.flush_pending(None);
            if simulate {
                state.step(gravity, dt);
            }
            state.ticks += 1;
            state.relocate();
        });
        if ticked.is_none() {
            log::warn!("advance_time on missing physics world {world}");
        }
    }

    fn submit_voxel_updates(&self, world: WorldId, encoded: &[u8]) -> Result<()> {
        // Decode everything before touching the world
        let batches = decode_shape_updates(encoded)?;
        self.with_world(world, |state| state.receive(batches))
            .ok_or(BridgeError::stale_world(world))
    }

    fn scalar(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyScalar) -> f64 {
        self.with_body(world, body, hint, |b| match field {
            BodyScalar::DynamicFriction => b.dynamic_friction,
            BodyScalar::StaticFriction => b.static_friction,
            BodyScalar::Restitution => b.restitution,
            BodyScalar::CollisionShapeScaling => b.collision_shape_scaling,
        })
    }

    fn set_scalar(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyScalar, value: f64) {
        self.with_body(world, body, hint, |b| {
            let slot = match field {
                BodyScalar::DynamicFriction => &mut b.dynamic_friction,
                BodyScalar::StaticFriction => &mut b.static_friction,
                BodyScalar::Restitution => &mut b.restitution,
                BodyScalar::CollisionShapeScaling => &mut b.collision_shape_scaling,
            };
            *slot = value;
        })
    }

    fn flag(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyFlag) -> bool {
        self.with_body(world, body, hint, |b| match field {
            BodyFlag::Static => b.is_static,
            BodyFlag::VoxelTerrainFullyLoaded => b.terrain_loaded,
        })
    }

    fn set_flag(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyFlag, value: bool) {
        self.with_body(world, body, hint, |b| match field {
            BodyFlag::Static => b.is_static = value,
            BodyFlag::VoxelTerrainFullyLoaded => b.terrain_loaded = value,
        })
    }

    fn vector(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyVector) -> DVec3 {
        self.with_body(world, body, hint, |b| match field {
            BodyVector::CollisionShapeOffset => b.collision_shape_offset,
            BodyVector::Velocity => b.velocity,
            BodyVector::Omega => b.omega,
        })
    }

    fn set_vector(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyVector, value: DVec3) {
        self.with_body(world, body, hint, |b| match field {
            BodyVector::CollisionShapeOffset => b.collision_shape_offset = value,
            BodyVector::Velocity => b.velocity = value,
            BodyVector::Omega => b.omega = value,
        })
    }

    fn read_transform(&self, world: WorldId, body: BodyId, hint: BodyIndex, out: &mut [u8; TRANSFORM_BYTES]) {
        *out = self.with_body(world, body, hint, |b| encode_transform(&b.transform));
    }

    fn write_transform(&self, world: WorldId, body: BodyId, hint: BodyIndex, data: &[u8; TRANSFORM_BYTES]) -> Result<()> {
        let transform = decode_transform(data)?;
        self.with_body(world, body, hint, |b| b.transform = transform);
        Ok(())
    }

    fn read_inertia(&self, world: WorldId, body: BodyId, hint: BodyIndex, out: &mut [u8; INERTIA_TENSOR_BYTES]) {
        *out = self.with_body(world, body, hint, |b| encode_inertia(&b.inertia));
    }

    fn write_inertia(&self, world: WorldId, body: BodyId, hint: BodyIndex, data: &[u8; INERTIA_TENSOR_BYTES]) -> Result<()> {
        let inertia = decode_inertia(data)?;
        self.with_body(world, body, hint, |b| b.inertia = inertia);
        Ok(())
    }

    fn queue_load(&self, world: WorldId, body: BodyId, hint: BodyIndex, load: Load) {
        self.with_body(world, body, hint, |b| {
            let loads = &mut b.loads;
            match load {
                Load::InvariantForce(f) => loads.invariant_force += f,
                Load::InvariantForceAtPos { local_pos, force } => {
                    loads.invariant_forces_at_pos.push((local_pos, force))
                }
                Load::InvariantTorque(t) => loads.invariant_torque += t,
                Load::RotDependentForce(f) => loads.rot_dependent_force += f,
                Load::RotDependentTorque(t) => loads.rot_dependent_torque += t,
            }
        })
    }

    fn queued_loads(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> QueuedLoads {
        self.with_body(world, body, hint, |b| b.loads.clone())
    }

    fn aabb(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Option<DAabb> {
        self.with_body(world, body, hint, |b| b.world_aabb())
    }

    fn voxel_shape_aabb(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Option<IAabb> {
        self.with_body(world, body, hint, |b| b.terrain.solid_bounds())
    }

    fn voxel_state(&self, world: WorldId, body: BodyId, hint: BodyIndex, pos: IVec3) -> VoxelState {
        self.with_body(world, body, hint, |b| b.terrain.state(pos))
    }

    fn solid_voxels(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Vec<IVec3> {
        self.with_body(world, body, hint, |b| b.terrain.solid_voxels())
    }
}
