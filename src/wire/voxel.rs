//! Voxel shape update batches
//!
//! Wire layout (all little-endian):
//!
//! ```text
//! i32 batch_count
//! per batch:  i32 body_id, i32 record_count
//! per record: i32 region_x, i32 region_y, i32 region_z, i32 control, payload
//! ```
//!
//! `control` bits 0-1 hold the variant tag, bit 2 the run-immediately flag and
//! bit 3 (Empty only) the overwrite flag. Every other bit must be zero.
//!
//! Payloads: Empty has none, Dense is 4096 material bytes, Sparse is an i32
//! entry count followed by `u16 packed position, u8 material` per entry.

use glam::IVec3;

use super::reader::ByteReader;
use crate::error::{BridgeError, DecodeError, Result};
use crate::native::BodyId;

/// Voxels per region edge
pub const REGION_EDGE: usize = 16;
/// Voxels per region (16^3)
pub const REGION_VOLUME: usize = REGION_EDGE * REGION_EDGE * REGION_EDGE;

const RECORD_HEADER_BYTES: usize = 16;
const BATCH_HEADER_BYTES: usize = 8;
const SPARSE_ENTRY_BYTES: usize = 3;

const TAG_MASK: i32 = 0b11;
const TAG_EMPTY: i32 = 0;
const TAG_DENSE: i32 = 1;
const TAG_SPARSE: i32 = 2;
const RUN_IMMEDIATELY_BIT: i32 = 1 << 2;
const OVERWRITE_EXISTING_BIT: i32 = 1 << 3;

const POSITION_MASK: u16 = 0x0fff;

/// Voxel coordinate inside a region, each axis in 0..16
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalVoxelPos {
    x: u8,
    y: u8,
    z: u8,
}

impl LocalVoxelPos {
    /// Returns `None` if any axis is outside 0..16
    pub fn new(x: u32, y: u32, z: u32) -> Option<Self> {
        let edge = REGION_EDGE as u32;
        if x >= edge || y >= edge || z >= edge {
            return None;
        }
        Some(Self {
            x: x as u8,
            y: y as u8,
            z: z as u8,
        })
    }

    /// Splits a body-space voxel position into its region and local position
    pub fn split(pos: IVec3) -> (IVec3, Self) {
        let region = pos >> 4;
        let local = Self {
            x: (pos.x & 15) as u8,
            y: (pos.y & 15) as u8,
            z: (pos.z & 15) as u8,
        };
        (region, local)
    }

    pub fn x(self) -> u32 {
        self.x as u32
    }

    pub fn y(self) -> u32 {
        self.y as u32
    }

    pub fn z(self) -> u32 {
        self.z as u32
    }

    /// Bits 0-3 = x, 4-7 = z, 8-11 = y
    pub fn pack(self) -> u16 {
        self.x as u16 | (self.z as u16) << 4 | (self.y as u16) << 8
    }

    pub fn unpack(packed: u16) -> std::result::Result<Self, DecodeError> {
        if packed & !POSITION_MASK != 0 {
            return Err(DecodeError::ReservedPositionBits(packed));
        }
        Ok(Self {
            x: (packed & 0xf) as u8,
            z: ((packed >> 4) & 0xf) as u8,
            y: ((packed >> 8) & 0xf) as u8,
        })
    }

    /// Index into a dense region; same bit order as the packed form
    pub fn dense_index(self) -> usize {
        self.pack() as usize
    }

    /// Position of this voxel in body space, given its region
    pub fn in_region(self, region: IVec3) -> IVec3 {
        region * REGION_EDGE as i32 + IVec3::new(self.x as i32, self.y as i32, self.z as i32)
    }
}

/// Full material block for one region
#[derive(Clone, PartialEq, Eq)]
pub struct DenseVoxels(Box<[u8; REGION_VOLUME]>);

impl DenseVoxels {
    /// All voxels set to material 0 (air)
    pub fn new() -> Self {
        Self(Box::new([0u8; REGION_VOLUME]))
    }

    pub fn from_bytes(bytes: Box<[u8; REGION_VOLUME]>) -> Self {
        Self(bytes)
    }

    pub fn get(&self, pos: LocalVoxelPos) -> u8 {
        self.0[pos.dense_index()]
    }

    pub fn set(&mut self, pos: LocalVoxelPos, material: u8) {
        self.0[pos.dense_index()] = material;
    }

    pub fn as_bytes(&self) -> &[u8; REGION_VOLUME] {
        &self.0
    }
}

impl Default for DenseVoxels {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DenseVoxels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_air = self.0.iter().filter(|m| **m != 0).count();
        f.debug_struct("DenseVoxels").field("non_air", &non_air).finish()
    }
}

/// One sparse edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseVoxel {
    pub pos: LocalVoxelPos,
    pub material: u8,
}

/// Payload of a voxel shape update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoxelUpdateKind {
    /// Region is entirely air
    Empty { overwrite_existing: bool },
    /// Region replaced wholesale
    Dense(DenseVoxels),
    /// Individual voxel edits, applied in order
    Sparse(Vec<SparseVoxel>),
}

/// A change to one 16^3 region of a voxel body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelShapeUpdate {
    pub region: IVec3,
    /// Apply on submit rather than at the next tick
    pub run_immediately: bool,
    pub kind: VoxelUpdateKind,
}

impl VoxelShapeUpdate {
    pub fn empty(region: IVec3, run_immediately: bool, overwrite_existing: bool) -> Self {
        Self {
            region,
            run_immediately,
            kind: VoxelUpdateKind::Empty { overwrite_existing },
        }
    }

    pub fn dense(region: IVec3, run_immediately: bool, voxels: DenseVoxels) -> Self {
        Self {
            region,
            run_immediately,
            kind: VoxelUpdateKind::Dense(voxels),
        }
    }

    pub fn sparse(region: IVec3, run_immediately: bool) -> Self {
        Self {
            region,
            run_immediately,
            kind: VoxelUpdateKind::Sparse(Vec::new()),
        }
    }

    /// Appends a sparse edit. No-op for other variants.
    pub fn add_sparse(&mut self, pos: LocalVoxelPos, material: u8) -> &mut Self {
        if let VoxelUpdateKind::Sparse(voxels) = &mut self.kind {
            voxels.push(SparseVoxel { pos, material });
        }
        self
    }

    /// Encoded size of this record in bytes
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_BYTES
            + match &self.kind {
                VoxelUpdateKind::Empty { .. } => 0,
                VoxelUpdateKind::Dense(_) => REGION_VOLUME,
                VoxelUpdateKind::Sparse(voxels) => 4 + SPARSE_ENTRY_BYTES * voxels.len(),
            }
    }

    fn control(&self) -> i32 {
        let mut control = match &self.kind {
            VoxelUpdateKind::Empty { overwrite_existing } => {
                if *overwrite_existing {
                    TAG_EMPTY | OVERWRITE_EXISTING_BIT
                } else {
                    TAG_EMPTY
                }
            }
            VoxelUpdateKind::Dense(_) => TAG_DENSE,
            VoxelUpdateKind::Sparse(_) => TAG_SPARSE,
        };
        if self.run_immediately {
            control |= RUN_IMMEDIATELY_BIT;
        }
        control
    }
}

/// Ordered updates for one body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyShapeUpdates {
    pub body_id: BodyId,
    pub updates: Vec<VoxelShapeUpdate>,
}

impl BodyShapeUpdates {
    pub fn new(body_id: BodyId, updates: Vec<VoxelShapeUpdate>) -> Self {
        Self { body_id, updates }
    }
}

/// Exact size of the encoded message
pub fn encoded_len(batches: &[BodyShapeUpdates]) -> usize {
    4 + batches
        .iter()
        .map(|b| BATCH_HEADER_BYTES + b.updates.iter().map(VoxelShapeUpdate::encoded_len).sum::<usize>())
        .sum::<usize>()
}

fn wire_count(len: usize, field: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| BridgeError::InvalidArgument(format!("{field} {len} does not fit in an i32")))
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Encodes a message; the buffer is sized up front and never grows
pub fn encode_shape_updates(batches: &[BodyShapeUpdates]) -> Result<Vec<u8>> {
    let size = encoded_len(batches);
    let mut out = Vec::with_capacity(size);

    put_i32(&mut out, wire_count(batches.len(), "batch count")?);
    for batch in batches {
        put_i32(&mut out, batch.body_id.0);
        put_i32(&mut out, wire_count(batch.updates.len(), "record count")?);
        for update in &batch.updates {
            put_i32(&mut out, update.region.x);
            put_i32(&mut out, update.region.y);
            put_i32(&mut out, update.region.z);
            put_i32(&mut out, update.control());
            match &update.kind {
                VoxelUpdateKind::Empty { .. } => {}
                VoxelUpdateKind::Dense(voxels) => out.extend_from_slice(voxels.as_bytes()),
                VoxelUpdateKind::Sparse(voxels) => {
                    put_i32(&mut out, wire_count(voxels.len(), "sparse entry count")?);
                    for voxel in voxels {
                        out.extend_from_slice(&voxel.pos.pack().to_le_bytes());
                        out.push(voxel.material);
                    }
                }
            }
        }
    }

    debug_assert_eq!(out.len(), size);
    log::debug!("Encoded {} shape update batches into {} bytes", batches.len(), size);
    Ok(out)
}

fn decode_record(reader: &mut ByteReader<'_>) -> std::result::Result<VoxelShapeUpdate, DecodeError> {
    let region = IVec3::new(
        reader.i32("region_x")?,
        reader.i32("region_y")?,
        reader.i32("region_z")?,
    );
    let control = reader.i32("control")?;

    let tag = control & TAG_MASK;
    let mut allowed = TAG_MASK | RUN_IMMEDIATELY_BIT;
    if tag == TAG_EMPTY {
        allowed |= OVERWRITE_EXISTING_BIT;
    }
    if tag != TAG_EMPTY && tag != TAG_DENSE && tag != TAG_SPARSE {
        return Err(DecodeError::UnknownVariantTag(tag as u32));
    }
    if control & !allowed != 0 {
        return Err(DecodeError::ReservedControlBits { control });
    }
    let run_immediately = control & RUN_IMMEDIATELY_BIT != 0;

    let kind = match tag {
        TAG_EMPTY => VoxelUpdateKind::Empty {
            overwrite_existing: control & OVERWRITE_EXISTING_BIT != 0,
        },
        TAG_DENSE => {
            let mut voxels = Box::new([0u8; REGION_VOLUME]);
            voxels.copy_from_slice(reader.take(REGION_VOLUME, "dense voxels")?);
            VoxelUpdateKind::Dense(DenseVoxels::from_bytes(voxels))
        }
        _ => {
            let count = reader.count("sparse entry count")?;
            let mut voxels = Vec::with_capacity(count.min(reader.remaining() / SPARSE_ENTRY_BYTES));
            for _ in 0..count {
                let pos = LocalVoxelPos::unpack(reader.u16("sparse position")?)?;
                let material = reader.u8("sparse material")?;
                voxels.push(SparseVoxel { pos, material });
            }
            VoxelUpdateKind::Sparse(voxels)
        }
    };

    Ok(VoxelShapeUpdate {
        region,
        run_immediately,
        kind,
    })
}

/// Decodes a whole message or nothing
pub fn decode_shape_updates(bytes: &[u8]) -> std::result::Result<Vec<BodyShapeUpdates>, DecodeError> {
    let mut reader = ByteReader::new(bytes);

    let batch_count = reader.count("batch count")?;
    let mut batches = Vec::with_capacity(batch_count.min(reader.remaining() / BATCH_HEADER_BYTES));
    for _ in 0..batch_count {
        let body_id = BodyId(reader.i32("body id")?);
        let record_count = reader.count("record count")?;
        let mut updates =
            Vec::with_capacity(record_count.min(reader.remaining() / RECORD_HEADER_BYTES));
        for _ in 0..record_count {
            updates.push(decode_record(&mut reader)?);
        }
        batches.push(BodyShapeUpdates { body_id, updates });
    }

    reader.finish()?;
    Ok(batches)
}
