//! Inertia encodings
//!
//! Two incompatible layouts exist and are kept as separate protocol versions:
//! - tensor (80 bytes): inverse mass, then the 3x3 inverse inertia tensor row-major
//! - diagonal (32 bytes): mass, then the diagonal moment of inertia
//!
//! Body handles speak the tensor layout.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use super::reader::{ByteReader, expect_len};
use crate::error::DecodeError;

/// 10 doubles * 8 bytes
pub const INERTIA_TENSOR_BYTES: usize = 80;
/// 4 doubles * 8 bytes
pub const INERTIA_DIAGONAL_BYTES: usize = 32;

/// Inverse mass and inverse inertia tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyInertia {
    pub inv_mass: f64,
    pub inv_moi: DMat3,
}

impl Default for RigidBodyInertia {
    fn default() -> Self {
        Self::unit()
    }
}

impl RigidBodyInertia {
    pub fn new(inv_mass: f64, inv_moi: DMat3) -> Self {
        Self { inv_mass, inv_moi }
    }

    /// Inverse mass 1, identity inverse tensor
    pub fn unit() -> Self {
        Self::new(1.0, DMat3::IDENTITY)
    }

    /// A body that never moves under loads
    pub fn immovable() -> Self {
        Self::new(0.0, DMat3::ZERO)
    }
}

/// Legacy mass + diagonal moment of inertia
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagonalInertia {
    pub mass: f64,
    pub moi: DVec3,
}

fn write_f64s(out: &mut [u8], values: &[f64]) {
    for (chunk, value) in out.chunks_exact_mut(8).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

pub fn encode_inertia(inertia: &RigidBodyInertia) -> [u8; INERTIA_TENSOR_BYTES] {
    let mut fields = [0.0; 10];
    fields[0] = inertia.inv_mass;
    // glam is column-major; the wire is row-major
    fields[1..].copy_from_slice(&inertia.inv_moi.transpose().to_cols_array());

    let mut out = [0u8; INERTIA_TENSOR_BYTES];
    write_f64s(&mut out, &fields);
    out
}

pub fn decode_inertia(bytes: &[u8]) -> Result<RigidBodyInertia, DecodeError> {
    expect_len(bytes, INERTIA_TENSOR_BYTES)?;
    let mut reader = ByteReader::new(bytes);

    let inv_mass = reader.f64("inv_mass")?;
    let mut rows = [0.0; 9];
    for value in rows.iter_mut() {
        *value = reader.f64("inv_moi")?;
    }

    Ok(RigidBodyInertia {
        inv_mass,
        inv_moi: DMat3::from_cols_array(&rows).transpose(),
    })
}

pub fn encode_diagonal_inertia(inertia: &DiagonalInertia) -> [u8; INERTIA_DIAGONAL_BYTES] {
    let m = inertia.moi;
    let mut out = [0u8; INERTIA_DIAGONAL_BYTES];
    write_f64s(&mut out, &[inertia.mass, m.x, m.y, m.z]);
    out
}

pub fn decode_diagonal_inertia(bytes: &[u8]) -> Result<DiagonalInertia, DecodeError> {
    expect_len(bytes, INERTIA_DIAGONAL_BYTES)?;
    let mut reader = ByteReader::new(bytes);

    let mass = reader.f64("mass")?;
    let moi = DVec3::new(reader.f64("moi.x")?, reader.f64("moi.y")?, reader.f64("moi.z")?);
    Ok(DiagonalInertia { mass, moi })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_immovable_encodes_as_zeros() {
        let bytes = encode_inertia(&RigidBodyInertia::immovable());
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(decode_inertia(&bytes).unwrap(), RigidBodyInertia::immovable());
    }

    #[test]
    fn test_tensor_is_row_major() {
        let inv_moi = DMat3::from_cols(
            DVec3::new(1.0, 4.0, 7.0),
            DVec3::new(2.0, 5.0, 8.0),
            DVec3::new(3.0, 6.0, 9.0),
        );
        let bytes = encode_inertia(&RigidBodyInertia::new(0.5, inv_moi));

        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_layouts_are_not_interchangeable() {
        let tensor = encode_inertia(&RigidBodyInertia::unit());
        assert!(matches!(
            decode_diagonal_inertia(&tensor),
            Err(DecodeError::LengthMismatch { expected: 32, actual: 80 })
        ));

        let diagonal = encode_diagonal_inertia(&DiagonalInertia {
            mass: 2.0,
            moi: DVec3::ONE,
        });
        assert!(matches!(
            decode_inertia(&diagonal),
            Err(DecodeError::LengthMismatch { expected: 80, actual: 32 })
        ));
    }

    fn finite() -> impl Strategy<Value = f64> {
        -1.0e12f64..1.0e12
    }

    proptest! {
        #[test]
        fn prop_tensor_roundtrip(inv_mass in finite(), cells in proptest::array::uniform9(finite())) {
            let inertia = RigidBodyInertia::new(inv_mass, DMat3::from_cols_array(&cells));
            prop_assert_eq!(decode_inertia(&encode_inertia(&inertia)).unwrap(), inertia);
        }

        #[test]
        fn prop_diagonal_roundtrip(mass in finite(), x in finite(), y in finite(), z in finite()) {
            let inertia = DiagonalInertia { mass, moi: DVec3::new(x, y, z) };
            prop_assert_eq!(decode_diagonal_inertia(&encode_diagonal_inertia(&inertia)).unwrap(), inertia);
        }
    }
}
