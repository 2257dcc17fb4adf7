use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use glam::DVec3;

use super::BodyHandle;
use crate::error::{BridgeError, Result};
use crate::native::{BodyId, NativeCore, NativeSettings, VoxelBodyDesc, WorldId};
use crate::settings::WorldSettings;
use crate::wire::{BodyShapeUpdates, encode_shape_updates};

/// World liveness shared between a world handle and its body handles
pub(crate) struct WorldShared {
    core: Rc<dyn NativeCore>,
    id: WorldId,
    alive: Cell<bool>,
}

impl WorldShared {
    pub(crate) fn core(&self) -> &dyn NativeCore {
        self.core.as_ref()
    }

    /// The world token, or `None` once the world is gone
    pub(crate) fn live_id(&self) -> Option<WorldId> {
        self.alive.get().then_some(self.id)
    }

    fn require_live(&self) -> Result<WorldId> {
        self.live_id().ok_or(BridgeError::stale_world(self.id))
    }

    fn delete(&self) {
        // Flip first so no caller can observe a half-deleted world
        if self.alive.replace(false) {
            self.core.delete_world(self.id);
            log::info!("Deleted physics world {}", self.id);
        }
    }
}

/// Sole owner of one native physics world
///
/// Not `Clone`. Dropping the handle deletes the world; every
/// [`BodyHandle`] created from it then reports deleted.
pub struct WorldHandle {
    shared: Rc<WorldShared>,
}

impl WorldHandle {
    /// Create a new native world
    ///
    /// On failure no native identity is retained.
    pub fn create(core: Rc<dyn NativeCore>) -> Result<Self> {
        let id = core.create_world()?;
        log::info!("Created physics world {id}");
        Ok(Self {
            shared: Rc::new(WorldShared {
                core,
                id,
                alive: Cell::new(true),
            }),
        })
    }

    /// Native token, for logging and diagnostics
    pub fn id(&self) -> WorldId {
        self.shared.id
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.live_id().is_none()
    }

    /// Release the native world. Calling this again is a no-op.
    pub fn delete(&self) {
        self.shared.delete();
    }

    pub fn create_voxel_body(&self, desc: &VoxelBodyDesc) -> Result<BodyHandle> {
        let world = self.shared.require_live()?;
        let id = self.shared.core().create_voxel_body(world, desc)?;
        log::debug!("Created rigid body {id} in physics world {world}");
        Ok(BodyHandle::new(Rc::clone(&self.shared), id))
    }

    /// Handle for an existing body id; validated on first access
    pub fn body(&self, id: BodyId) -> BodyHandle {
        BodyHandle::new(Rc::clone(&self.shared), id)
    }

    /// Returns whether a body with that id existed and was removed
    pub fn delete_body(&self, id: BodyId) -> Result<bool> {
        let world = self.shared.require_live()?;
        let removed = self.shared.core().delete_body(world, id);
        if removed {
            log::debug!("Deleted rigid body {id} from physics world {world}");
        }
        Ok(removed)
    }

    pub fn apply_settings(&self, settings: &WorldSettings) -> Result<()> {
        let world = self.shared.require_live()?;
        let native = NativeSettings::from_settings(settings)?;
        self.shared.core().apply_settings(world, &native)
    }

    /// Advance the world by `dt` seconds
    ///
    /// With `simulate` off, queued voxel updates are still applied but
    /// bodies stay where they are and queued loads carry over.
    pub fn tick(&self, gravity: DVec3, dt: f64, simulate: bool) -> Result<()> {
        let world = self.shared.require_live()?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(BridgeError::InvalidArgument(format!("tick dt {dt} must be finite and non-negative")));
        }
        self.shared.core().advance_time(world, gravity, dt, simulate);
        Ok(())
    }

    /// Encode `batches` and hand them to the core in one message
    pub fn queue_voxel_shape_updates(&self, batches: &[BodyShapeUpdates]) -> Result<()> {
        let world = self.shared.require_live()?;
        if batches.is_empty() {
            return Ok(());
        }
        let encoded = encode_shape_updates(batches)?;
        self.shared.core().submit_voxel_updates(world, &encoded)
    }
}

impl Drop for WorldHandle {
    fn drop(&mut self) {
        self.shared.delete();
    }
}

impl fmt::Debug for WorldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldHandle")
            .field("id", &self.shared.id)
            .field("alive", &self.shared.alive.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{CoreLimits, MemoryCore};
    use crate::settings::SolverType;
    use glam::IVec3;

    fn desc() -> VoxelBodyDesc {
        VoxelBodyDesc::new(IVec3::ZERO, IVec3::splat(15))
    }

    #[test]
    fn test_create_failure_keeps_nothing() {
        let core = Rc::new(MemoryCore::with_limits(CoreLimits {
            max_worlds: 0,
            ..Default::default()
        }));
        let err = WorldHandle::create(core.clone()).unwrap_err();
        assert!(matches!(err, BridgeError::ResourceExhausted { .. }));
        assert_eq!(core.live_worlds(), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let core = Rc::new(MemoryCore::new());
        let world = WorldHandle::create(core.clone()).unwrap();
        world.delete();
        world.delete();
        assert!(world.is_deleted());
        assert_eq!(core.live_worlds(), 0);
    }

    #[test]
    fn test_operations_after_delete_are_stale() {
        let world = WorldHandle::create(Rc::new(MemoryCore::new())).unwrap();
        world.delete();

        assert!(world.create_voxel_body(&desc()).unwrap_err().is_stale());
        assert!(world.delete_body(BodyId(0)).unwrap_err().is_stale());
        assert!(world.tick(DVec3::ZERO, 0.05, true).unwrap_err().is_stale());
        assert!(world.apply_settings(&WorldSettings::default()).unwrap_err().is_stale());
        assert!(world.queue_voxel_shape_updates(&[]).unwrap_err().is_stale());
    }

    #[test]
    fn test_drop_deletes_world() {
        let core = Rc::new(MemoryCore::new());
        let body = {
            let world = WorldHandle::create(core.clone()).unwrap();
            world.create_voxel_body(&desc()).unwrap()
        };
        assert_eq!(core.live_worlds(), 0);
        assert!(body.has_been_deleted());
    }

    #[test]
    fn test_apply_settings_reaches_core() {
        let core = Rc::new(MemoryCore::new());
        let world = WorldHandle::create(core.clone()).unwrap();
        let settings = WorldSettings {
            solver_type: SolverType::GaussSeidel,
            ..Default::default()
        };
        world.apply_settings(&settings).unwrap();
        assert_eq!(core.solver(world.id()), Some(SolverType::GaussSeidel));

        let bad = WorldSettings {
            iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            world.apply_settings(&bad),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tick_rejects_bad_dt() {
        let core = Rc::new(MemoryCore::new());
        let world = WorldHandle::create(core.clone()).unwrap();
        assert!(world.tick(DVec3::ZERO, f64::NAN, true).is_err());
        assert!(world.tick(DVec3::ZERO, -1.0, true).is_err());
        world.tick(DVec3::ZERO, 0.05, true).unwrap();
        assert_eq!(core.ticks(world.id()), 1);
    }
}
