use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use glam::{DVec3, IVec3};

use super::world::WorldShared;
use crate::error::{BridgeError, Result};
use crate::native::{
    BodyFlag, BodyId, BodyIndex, BodyScalar, BodyVector, DAabb, IAabb, Load, NativeCore,
    QueuedLoads, VoxelState, WorldId,
};
use crate::wire::{
    INERTIA_TENSOR_BYTES, RigidBodyInertia, RigidBodyTransform, TRANSFORM_BYTES, decode_inertia,
    decode_transform, encode_inertia, encode_transform,
};

/// Reference to a rigid body inside a world
///
/// Does not own the body. Holds the permanent id plus a cached storage
/// index that is revalidated by the core before every access, so a handle
/// can never read a different body that moved into its old slot.
///
/// Clones share the body but keep their own index hint.
#[derive(Clone)]
pub struct BodyHandle {
    world: Rc<WorldShared>,
    id: BodyId,
    hint: Cell<BodyIndex>,
}

impl BodyHandle {
    pub(crate) fn new(world: Rc<WorldShared>, id: BodyId) -> Self {
        Self {
            world,
            id,
            hint: Cell::new(BodyIndex::DEFAULT),
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    /// Last index the core reported; may already be out of date
    pub fn index_hint(&self) -> BodyIndex {
        self.hint.get()
    }

    /// Whether the body or its world is gone. Once true, stays true.
    pub fn has_been_deleted(&self) -> bool {
        self.resolve().is_err()
    }

    /// Revalidate the index hint, returning the world and current index
    fn resolve(&self) -> Result<(WorldId, BodyIndex)> {
        let hint = self.hint.get();
        if hint.is_deleted() {
            return Err(BridgeError::stale_body(self.id));
        }
        let Some(world) = self.world.live_id() else {
            self.hint.set(BodyIndex::DELETED);
            return Err(BridgeError::stale_body(self.id));
        };

        let index = self.world.core().resolve_body_index(world, self.id, hint);
        self.hint.set(index);
        if index.is_deleted() {
            log::debug!("Rigid body {} is gone from physics world {world}", self.id);
            return Err(BridgeError::stale_body(self.id));
        }
        if index != hint {
            log::debug!("Rigid body {} moved from slot {} to {}", self.id, hint.0, index.0);
        }
        Ok((world, index))
    }

    /// Resolve, then run exactly one core call with the fresh hint
    fn with_core<R>(&self, f: impl FnOnce(&dyn NativeCore, WorldId, BodyIndex) -> R) -> Result<R> {
        let (world, index) = self.resolve()?;
        Ok(f(self.world.core(), world, index))
    }

    fn scalar(&self, field: BodyScalar) -> Result<f64> {
        self.with_core(|core, world, index| core.scalar(world, self.id, index, field))
    }

    fn set_scalar(&self, field: BodyScalar, value: f64) -> Result<()> {
        self.with_core(|core, world, index| core.set_scalar(world, self.id, index, field, value))
    }

    fn flag(&self, field: BodyFlag) -> Result<bool> {
        self.with_core(|core, world, index| core.flag(world, self.id, index, field))
    }

    fn set_flag(&self, field: BodyFlag, value: bool) -> Result<()> {
        self.with_core(|core, world, index| core.set_flag(world, self.id, index, field, value))
    }

    fn vector(&self, field: BodyVector) -> Result<DVec3> {
        self.with_core(|core, world, index| core.vector(world, self.id, index, field))
    }

    fn set_vector(&self, field: BodyVector, value: DVec3) -> Result<()> {
        self.with_core(|core, world, index| core.set_vector(world, self.id, index, field, value))
    }

    fn queue_load(&self, load: Load) -> Result<()> {
        self.with_core(|core, world, index| core.queue_load(world, self.id, index, load))
    }

    // === Material ===

    pub fn dynamic_friction(&self) -> Result<f64> {
        self.scalar(BodyScalar::DynamicFriction)
    }

    pub fn set_dynamic_friction(&self, value: f64) -> Result<()> {
        self.set_scalar(BodyScalar::DynamicFriction, value)
    }

    pub fn static_friction(&self) -> Result<f64> {
        self.scalar(BodyScalar::StaticFriction)
    }

    pub fn set_static_friction(&self, value: f64) -> Result<()> {
        self.set_scalar(BodyScalar::StaticFriction, value)
    }

    /// Coefficient of restitution, 0 is fully inelastic
    pub fn restitution(&self) -> Result<f64> {
        self.scalar(BodyScalar::Restitution)
    }

    pub fn set_restitution(&self, value: f64) -> Result<()> {
        self.set_scalar(BodyScalar::Restitution, value)
    }

    // === Shape ===

    pub fn collision_shape_scaling(&self) -> Result<f64> {
        self.scalar(BodyScalar::CollisionShapeScaling)
    }

    pub fn set_collision_shape_scaling(&self, value: f64) -> Result<()> {
        self.set_scalar(BodyScalar::CollisionShapeScaling, value)
    }

    /// Offset of the voxel grid from the body origin, in voxels
    pub fn collision_shape_offset(&self) -> Result<DVec3> {
        self.vector(BodyVector::CollisionShapeOffset)
    }

    pub fn set_collision_shape_offset(&self, value: DVec3) -> Result<()> {
        self.set_vector(BodyVector::CollisionShapeOffset, value)
    }

    pub fn is_static(&self) -> Result<bool> {
        self.flag(BodyFlag::Static)
    }

    pub fn set_static(&self, value: bool) -> Result<()> {
        self.set_flag(BodyFlag::Static, value)
    }

    pub fn voxel_terrain_fully_loaded(&self) -> Result<bool> {
        self.flag(BodyFlag::VoxelTerrainFullyLoaded)
    }

    pub fn set_voxel_terrain_fully_loaded(&self, value: bool) -> Result<()> {
        self.set_flag(BodyFlag::VoxelTerrainFullyLoaded, value)
    }

    // === Motion ===

    pub fn transform(&self) -> Result<RigidBodyTransform> {
        let mut buf = [0u8; TRANSFORM_BYTES];
        self.with_core(|core, world, index| core.read_transform(world, self.id, index, &mut buf))?;
        Ok(decode_transform(&buf)?)
    }

    pub fn set_transform(&self, transform: &RigidBodyTransform) -> Result<()> {
        let buf = encode_transform(transform);
        self.with_core(|core, world, index| core.write_transform(world, self.id, index, &buf))?
    }

    pub fn inertia(&self) -> Result<RigidBodyInertia> {
        let mut buf = [0u8; INERTIA_TENSOR_BYTES];
        self.with_core(|core, world, index| core.read_inertia(world, self.id, index, &mut buf))?;
        Ok(decode_inertia(&buf)?)
    }

    pub fn set_inertia(&self, inertia: &RigidBodyInertia) -> Result<()> {
        let buf = encode_inertia(inertia);
        self.with_core(|core, world, index| core.write_inertia(world, self.id, index, &buf))?
    }

    pub fn velocity(&self) -> Result<DVec3> {
        self.vector(BodyVector::Velocity)
    }

    pub fn set_velocity(&self, value: DVec3) -> Result<()> {
        self.set_vector(BodyVector::Velocity, value)
    }

    /// Angular velocity, world frame
    pub fn omega(&self) -> Result<DVec3> {
        self.vector(BodyVector::Omega)
    }

    pub fn set_omega(&self, value: DVec3) -> Result<()> {
        self.set_vector(BodyVector::Omega, value)
    }

    // === Loads, cleared after each simulated tick ===

    pub fn add_invariant_force(&self, force: DVec3) -> Result<()> {
        self.queue_load(Load::InvariantForce(force))
    }

    pub fn add_invariant_force_at_pos(&self, local_pos: DVec3, force: DVec3) -> Result<()> {
        self.queue_load(Load::InvariantForceAtPos { local_pos, force })
    }

    pub fn add_invariant_torque(&self, torque: DVec3) -> Result<()> {
        self.queue_load(Load::InvariantTorque(torque))
    }

    pub fn add_rot_dependent_force(&self, force: DVec3) -> Result<()> {
        self.queue_load(Load::RotDependentForce(force))
    }

    pub fn add_rot_dependent_torque(&self, torque: DVec3) -> Result<()> {
        self.queue_load(Load::RotDependentTorque(torque))
    }

    pub fn queued_loads(&self) -> Result<QueuedLoads> {
        self.with_core(|core, world, index| core.queued_loads(world, self.id, index))
    }

    // === Bounds and voxels ===

    pub fn aabb(&self) -> Result<Option<DAabb>> {
        self.with_core(|core, world, index| core.aabb(world, self.id, index))
    }

    pub fn voxel_shape_aabb(&self) -> Result<Option<IAabb>> {
        self.with_core(|core, world, index| core.voxel_shape_aabb(world, self.id, index))
    }

    pub fn voxel_state(&self, pos: IVec3) -> Result<VoxelState> {
        self.with_core(|core, world, index| core.voxel_state(world, self.id, index, pos))
    }

    pub fn solid_voxels(&self) -> Result<Vec<IVec3>> {
        self.with_core(|core, world, index| core.solid_voxels(world, self.id, index))
    }
}

impl PartialEq for BodyHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.world, &other.world) && self.id == other.id
    }
}

impl Eq for BodyHandle {}

impl fmt::Debug for BodyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyHandle")
            .field("id", &self.id)
            .field("hint", &self.hint.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::WorldHandle;
    use crate::native::{MemoryCore, VoxelBodyDesc, materials};
    use crate::wire::{BodyShapeUpdates, LocalVoxelPos, VoxelShapeUpdate};
    use glam::{DMat3, DQuat};

    fn setup() -> (Rc<MemoryCore>, WorldHandle) {
        let core = Rc::new(MemoryCore::new());
        let world = WorldHandle::create(core.clone()).unwrap();
        (core, world)
    }

    fn desc() -> VoxelBodyDesc {
        VoxelBodyDesc::new(IVec3::ZERO, IVec3::splat(15))
    }

    #[test]
    fn test_fresh_handle_uses_default_hint() {
        let (_core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();
        assert_eq!(body.index_hint(), BodyIndex::DEFAULT);
        assert!(!body.has_been_deleted());
    }

    #[test]
    fn test_deleted_handle_makes_no_core_calls() {
        let (core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();
        assert!(world.delete_body(body.id()).unwrap());
        assert!(body.has_been_deleted());
        assert_eq!(body.index_hint(), BodyIndex::DELETED);

        let calls = core.stats().calls;
        assert!(body.has_been_deleted());
        assert!(body.restitution().unwrap_err().is_stale());
        assert_eq!(core.stats().calls, calls);
    }

    #[test]
    fn test_world_delete_cascades_without_core_calls() {
        let (core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();
        world.delete();

        let resolves = core.stats().resolve_calls;
        assert!(body.has_been_deleted());
        assert!(body.velocity().unwrap_err().is_stale());
        assert_eq!(core.stats().resolve_calls, resolves);
    }

    #[test]
    fn test_hint_heals_after_relocation() {
        let (core, world) = setup();
        let first = world.create_voxel_body(&desc()).unwrap();
        let last = world.create_voxel_body(&desc()).unwrap();
        last.set_restitution(0.25).unwrap();
        assert_eq!(last.index_hint(), BodyIndex(1));

        assert!(world.delete_body(first.id()).unwrap());
        assert_eq!(last.restitution().unwrap(), 0.25);
        assert_eq!(last.index_hint(), BodyIndex(0));

        let misses = core.stats().hint_misses;
        last.restitution().unwrap();
        assert_eq!(core.stats().hint_misses, misses);
    }

    #[test]
    fn test_scalar_and_flag_fields() {
        let (_core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();

        body.set_dynamic_friction(0.3).unwrap();
        body.set_static_friction(0.7).unwrap();
        body.set_collision_shape_scaling(2.0).unwrap();
        body.set_static(true).unwrap();

        assert_eq!(body.dynamic_friction().unwrap(), 0.3);
        assert_eq!(body.static_friction().unwrap(), 0.7);
        assert_eq!(body.collision_shape_scaling().unwrap(), 2.0);
        assert!(body.is_static().unwrap());
        assert!(!body.voxel_terrain_fully_loaded().unwrap());
    }

    #[test]
    fn test_transform_and_inertia_cross_the_wire() {
        let (_core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();

        let transform = RigidBodyTransform::new(
            DVec3::new(1.5, -2.0, 8.25),
            DQuat::from_rotation_y(0.5),
        );
        body.set_transform(&transform).unwrap();
        assert_eq!(body.transform().unwrap(), transform);

        let inertia = RigidBodyInertia::new(
            0.5,
            DMat3::from_cols_array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]),
        );
        body.set_inertia(&inertia).unwrap();
        assert_eq!(body.inertia().unwrap(), inertia);
    }

    #[test]
    fn test_loads_accumulate() {
        let (_core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();
        body.add_invariant_force(DVec3::Y).unwrap();
        body.add_invariant_force(DVec3::Y).unwrap();
        body.add_rot_dependent_torque(DVec3::Z).unwrap();
        body.add_invariant_force_at_pos(DVec3::X, DVec3::Y).unwrap();

        let loads = body.queued_loads().unwrap();
        assert_eq!(loads.invariant_force, DVec3::new(0.0, 2.0, 0.0));
        assert_eq!(loads.rot_dependent_torque, DVec3::Z);
        assert_eq!(loads.invariant_forces_at_pos, vec![(DVec3::X, DVec3::Y)]);
    }

    #[test]
    fn test_voxel_reads_and_bounds() {
        let (_core, world) = setup();
        let body = world.create_voxel_body(&desc()).unwrap();
        assert_eq!(body.voxel_state(IVec3::ZERO).unwrap(), VoxelState::Unloaded);
        assert_eq!(body.aabb().unwrap(), None);

        let mut update = VoxelShapeUpdate::sparse(IVec3::ZERO, true);
        update
            .add_sparse(LocalVoxelPos::new(0, 0, 0).unwrap(), materials::SOLID)
            .add_sparse(LocalVoxelPos::new(1, 2, 3).unwrap(), materials::SOLID);
        world
            .queue_voxel_shape_updates(&[BodyShapeUpdates::new(body.id(), vec![update])])
            .unwrap();

        assert_eq!(
            body.solid_voxels().unwrap(),
            vec![IVec3::ZERO, IVec3::new(1, 2, 3)]
        );
        assert_eq!(
            body.voxel_shape_aabb().unwrap(),
            Some(IAabb::new(IVec3::ZERO, IVec3::new(1, 2, 3)))
        );
        assert_eq!(
            body.aabb().unwrap(),
            Some(DAabb {
                min: DVec3::ZERO,
                max: DVec3::new(2.0, 3.0, 4.0),
            })
        );
    }

    #[test]
    fn test_clones_compare_equal() {
        let (_core, world) = setup();
        let a = world.create_voxel_body(&desc()).unwrap();
        let b = world.create_voxel_body(&desc()).unwrap();
        assert_eq!(a.clone(), a);
        assert_ne!(a, b);
        assert_eq!(world.body(a.id()), a);
    }
}
