//! Voxel Physics Bridge - safe handles and wire codecs for a native physics core
//!
//! Core modules:
//! - `handle`: World and body handles with stale-reference detection
//! - `native`: The `NativeCore` boundary and an in-memory reference core
//! - `wire`: Binary layouts for voxel updates, transforms and inertia
//! - `settings`: Solver settings, persisted as JSON
//! - `error`: Error kinds surfaced to the host

pub mod error;
pub mod handle;
pub mod native;
pub mod settings;
pub mod wire;

pub use error::{BridgeError, DecodeError, Result};
pub use handle::{BodyHandle, WorldHandle};
pub use native::{BodyId, BodyIndex, MemoryCore, NativeCore, VoxelBodyDesc, WorldId};
pub use settings::{SolverType, WorldSettings};

/// Defaults used by the demo driver
pub mod consts {
    use glam::DVec3;

    /// Fixed tick (20 Hz, one game tick)
    pub const TICK_DT: f64 = 1.0 / 20.0;
    /// Standard gravity, Y down
    pub const GRAVITY: DVec3 = DVec3::new(0.0, -9.81, 0.0);
}
