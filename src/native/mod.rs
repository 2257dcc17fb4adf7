//! The native physics core boundary
//!
//! [`NativeCore`] is the capability object through which every call into the
//! engine goes. Handles never hold engine pointers: a world is a [`WorldId`]
//! token and a body is a permanent [`BodyId`] plus a [`BodyIndex`] hint that
//! the core revalidates on each access.
//!
//! [`MemoryCore`] is an in-process implementation used by tests and the demo
//! binary. It relocates bodies on deletion the way a compacting native store
//! does.

pub mod memory;
pub mod terrain;

use std::fmt;

use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::settings::WorldSettings;
use crate::wire::{INERTIA_TENSOR_BYTES, TRANSFORM_BYTES};

pub use memory::{CoreLimits, CoreStats, MemoryCore};

/// Opaque identity of a native physics world
///
/// Never dereferenced on the host side; only passed back to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(u64);

impl WorldId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permanent id of a rigid body, assigned once by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub i32);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cached guess of where a body sits in the core's storage
///
/// Only a hint: the core revalidates it on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyIndex(pub i32);

impl BodyIndex {
    /// Starting hint for a fresh handle
    pub const DEFAULT: BodyIndex = BodyIndex(0);
    /// Returned by [`NativeCore::resolve_body_index`] once a body is gone
    pub const DELETED: BodyIndex = BodyIndex(-1);

    pub fn is_deleted(self) -> bool {
        self == Self::DELETED
    }

    /// Storage slot, if this is a real position
    pub fn slot(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl Default for BodyIndex {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Scalar body properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyScalar {
    DynamicFriction,
    StaticFriction,
    Restitution,
    CollisionShapeScaling,
}

/// Boolean body properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFlag {
    Static,
    /// Until set, a voxel body does not move
    VoxelTerrainFullyLoaded,
}

/// Vector body properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyVector {
    CollisionShapeOffset,
    Velocity,
    Omega,
}

/// A force or torque queued for the next tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Load {
    /// World-frame force through the center of mass
    InvariantForce(DVec3),
    /// World-frame force applied at a body-local position
    InvariantForceAtPos { local_pos: DVec3, force: DVec3 },
    InvariantTorque(DVec3),
    /// Body-frame force, rotated with the body
    RotDependentForce(DVec3),
    RotDependentTorque(DVec3),
}

/// Loads queued on a body for the next tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuedLoads {
    pub invariant_force: DVec3,
    pub invariant_torque: DVec3,
    pub rot_dependent_force: DVec3,
    pub rot_dependent_torque: DVec3,
    /// (local position, force) pairs
    pub invariant_forces_at_pos: Vec<(DVec3, DVec3)>,
}

/// Axis-aligned box in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DAabb {
    pub min: DVec3,
    pub max: DVec3,
}

/// Axis-aligned box in voxel space, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IAabb {
    pub min: IVec3,
    pub max: IVec3,
}

impl IAabb {
    pub fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, pos: IVec3) -> bool {
        pos.cmpge(self.min).all() && pos.cmple(self.max).all()
    }

    /// Smallest box containing `self` and `pos`
    pub fn grow(&self, pos: IVec3) -> Self {
        Self {
            min: self.min.min(pos),
            max: self.max.max(pos),
        }
    }
}

/// Well-known voxel materials
pub mod materials {
    pub const AIR: u8 = 0;
    pub const SOLID: u8 = 1;
    pub const WATER: u8 = 2;
    pub const LAVA: u8 = 3;
}

/// What the core knows about one voxel of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelState {
    /// Inside the defined region but no update has loaded it yet
    Unloaded,
    Material(u8),
}

/// Arguments for creating a voxel rigid body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelBodyDesc {
    /// Host-side dimension tag, passed through
    pub dimension: i32,
    /// Voxels inside this box start unloaded; outside it they are air
    pub min_defined: IVec3,
    pub max_defined: IVec3,
    /// Bounds any voxel of this body may ever occupy
    pub total_voxel_region: IAabb,
}

impl VoxelBodyDesc {
    pub fn new(min_defined: IVec3, max_defined: IVec3) -> Self {
        Self {
            dimension: 0,
            min_defined,
            max_defined,
            total_voxel_region: IAabb::new(IVec3::splat(-128), IVec3::splat(127)),
        }
    }
}

/// Settings payload as the core receives it
///
/// The solver is named, not typed: the core decides which names it knows.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSettings {
    pub sub_steps: i32,
    pub iterations: i32,
    pub solver_iteration_weight: f64,
    pub collision_compliance: f64,
    pub collision_restitution_compliance: f64,
    pub dynamic_friction_compliance: f64,
    pub speculative_contact_distance: f64,
    pub solver_name: String,
    pub max_collision_points: i32,
    pub max_collision_point_depth: f64,
    pub max_de_penetration_speed: f64,
    pub max_voxel_shape_collision_points: i32,
}

impl NativeSettings {
    /// Validates `settings` and flattens it for the core
    pub fn from_settings(settings: &WorldSettings) -> Result<Self> {
        settings.validate()?;
        // validate() guarantees every count fits in an i32
        Ok(Self {
            sub_steps: settings.sub_steps as i32,
            iterations: settings.iterations as i32,
            solver_iteration_weight: settings.solver_iteration_weight,
            collision_compliance: settings.collision_compliance,
            collision_restitution_compliance: settings.collision_restitution_compliance,
            dynamic_friction_compliance: settings.dynamic_friction_compliance,
            speculative_contact_distance: settings.speculative_contact_distance,
            solver_name: settings.solver_type.as_str().to_string(),
            max_collision_points: settings.max_collision_points as i32,
            max_collision_point_depth: settings.max_collision_point_depth,
            max_de_penetration_speed: settings.max_de_penetration_speed,
            max_voxel_shape_collision_points: settings.max_voxel_shape_collision_points as i32,
        })
    }
}

/// Operations the native physics core must support
///
/// Body calls take the permanent id plus the caller's index hint. Callers
/// resolve the hint through [`NativeCore::resolve_body_index`] first; the
/// per-field calls may assume the body exists at `hint`.
pub trait NativeCore {
    fn create_world(&self) -> Result<WorldId>;
    fn delete_world(&self, world: WorldId);

    fn create_voxel_body(&self, world: WorldId, desc: &VoxelBodyDesc) -> Result<BodyId>;
    /// Returns whether a body with that id existed and was removed
    fn delete_body(&self, world: WorldId, body: BodyId) -> bool;

    /// Current storage index of `body`, or [`BodyIndex::DELETED`]
    ///
    /// O(1) when `hint` is already correct.
    fn resolve_body_index(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> BodyIndex;

    fn apply_settings(&self, world: WorldId, settings: &NativeSettings) -> Result<()>;
    fn advance_time(&self, world: WorldId, gravity: DVec3, dt: f64, simulate: bool);
    /// Takes an encoded voxel update message; all or nothing
    fn submit_voxel_updates(&self, world: WorldId, encoded: &[u8]) -> Result<()>;

    fn scalar(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyScalar) -> f64;
    fn set_scalar(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyScalar, value: f64);
    fn flag(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyFlag) -> bool;
    fn set_flag(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyFlag, value: bool);
    fn vector(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyVector) -> DVec3;
    fn set_vector(&self, world: WorldId, body: BodyId, hint: BodyIndex, field: BodyVector, value: DVec3);

    fn read_transform(&self, world: WorldId, body: BodyId, hint: BodyIndex, out: &mut [u8; TRANSFORM_BYTES]);
    fn write_transform(&self, world: WorldId, body: BodyId, hint: BodyIndex, data: &[u8; TRANSFORM_BYTES]) -> Result<()>;
    fn read_inertia(&self, world: WorldId, body: BodyId, hint: BodyIndex, out: &mut [u8; INERTIA_TENSOR_BYTES]);
    fn write_inertia(&self, world: WorldId, body: BodyId, hint: BodyIndex, data: &[u8; INERTIA_TENSOR_BYTES]) -> Result<()>;

    fn queue_load(&self, world: WorldId, body: BodyId, hint: BodyIndex, load: Load);
    fn queued_loads(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> QueuedLoads;

    /// World-space bounds, `None` if the body has no solid voxels
    fn aabb(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Option<DAabb>;
    /// Voxel-space bounds of the solid voxels, `None` if there are none
    fn voxel_shape_aabb(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Option<IAabb>;
    fn voxel_state(&self, world: WorldId, body: BodyId, hint: BodyIndex, pos: IVec3) -> VoxelState;
    /// Solid voxels, sorted by (y, z, x)
    fn solid_voxels(&self, world: WorldId, body: BodyId, hint: BodyIndex) -> Vec<IVec3>;
}
