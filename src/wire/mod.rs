//! Binary encodings for data crossing the native boundary
//!
//! Everything here is a pure function over bytes:
//! - fixed layouts for rigid body pose and inertia
//! - the variable-length voxel shape update message
//!
//! All multi-byte fields are little-endian, packed, no padding.

pub mod inertia;
pub(crate) mod reader;
pub mod transform;
pub mod voxel;

pub use inertia::{
    DiagonalInertia, INERTIA_DIAGONAL_BYTES, INERTIA_TENSOR_BYTES, RigidBodyInertia,
    decode_diagonal_inertia, decode_inertia, encode_diagonal_inertia, encode_inertia,
};
pub use transform::{RigidBodyTransform, TRANSFORM_BYTES, decode_transform, encode_transform};
pub use voxel::{
    BodyShapeUpdates, DenseVoxels, LocalVoxelPos, REGION_EDGE, REGION_VOLUME, SparseVoxel,
    VoxelShapeUpdate, VoxelUpdateKind, decode_shape_updates, encode_shape_updates, encoded_len,
};
