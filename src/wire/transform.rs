//! Rigid body pose encoding
//!
//! Layout (little-endian f64): position x, y, z then rotation x, y, z, w.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use super::reader::{ByteReader, expect_len};
use crate::error::DecodeError;

/// 7 doubles * 8 bytes
pub const TRANSFORM_BYTES: usize = 56;

/// Position and orientation of a rigid body
///
/// The rotation is not normalized here; that is the native core's concern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyTransform {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Default for RigidBodyTransform {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
        }
    }
}

impl RigidBodyTransform {
    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

pub fn encode_transform(transform: &RigidBodyTransform) -> [u8; TRANSFORM_BYTES] {
    let p = transform.position;
    let q = transform.rotation;
    let fields = [p.x, p.y, p.z, q.x, q.y, q.z, q.w];

    let mut out = [0u8; TRANSFORM_BYTES];
    for (chunk, value) in out.chunks_exact_mut(8).zip(fields) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_transform(bytes: &[u8]) -> Result<RigidBodyTransform, DecodeError> {
    expect_len(bytes, TRANSFORM_BYTES)?;
    let mut reader = ByteReader::new(bytes);

    let position = DVec3::new(
        reader.f64("position.x")?,
        reader.f64("position.y")?,
        reader.f64("position.z")?,
    );
    let rotation = DQuat::from_xyzw(
        reader.f64("rotation.x")?,
        reader.f64("rotation.y")?,
        reader.f64("rotation.z")?,
        reader.f64("rotation.w")?,
    );

    Ok(RigidBodyTransform { position, rotation })
}
