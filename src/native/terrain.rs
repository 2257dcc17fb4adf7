//! Voxel storage for one body of the in-memory core

use std::collections::HashMap;

use glam::IVec3;

use super::{IAabb, VoxelBodyDesc, VoxelState, materials};
use crate::wire::{DenseVoxels, LocalVoxelPos, VoxelShapeUpdate, VoxelUpdateKind};

/// log2 of the region edge
const REGION_SHIFT: i32 = 4;

/// Only the solid material collides
pub fn is_solid(material: u8) -> bool {
    material == materials::SOLID
}

#[derive(Debug, Clone)]
pub struct VoxelTerrain {
    /// Positions in here read as unloaded until their region arrives
    defined: IAabb,
    total: IAabb,
    regions: HashMap<IVec3, DenseVoxels>,
}

impl VoxelTerrain {
    pub fn new(desc: &VoxelBodyDesc) -> Self {
        Self {
            defined: IAabb::new(desc.min_defined, desc.max_defined),
            total: desc.total_voxel_region,
            regions: HashMap::new(),
        }
    }

    /// Compared in region space; wire regions may be any i32
    fn region_in_total(&self, region: IVec3) -> bool {
        IAabb::new(self.total.min >> REGION_SHIFT, self.total.max >> REGION_SHIFT).contains(region)
    }

    pub fn state(&self, pos: IVec3) -> VoxelState {
        let (region, local) = LocalVoxelPos::split(pos);
        match self.regions.get(&region) {
            Some(voxels) => VoxelState::Material(voxels.get(local)),
            None if self.defined.contains(pos) => VoxelState::Unloaded,
            None => VoxelState::Material(materials::AIR),
        }
    }

    pub fn is_region_loaded(&self, region: IVec3) -> bool {
        self.regions.contains_key(&region)
    }

    pub fn apply(&mut self, update: &VoxelShapeUpdate) {
        if !self.region_in_total(update.region) {
            log::warn!(
                "Ignoring voxel update for region {} outside the body's voxel bounds",
                update.region
            );
            return;
        }

        match &update.kind {
            VoxelUpdateKind::Empty { overwrite_existing } => {
                if *overwrite_existing || !self.is_region_loaded(update.region) {
                    self.regions.insert(update.region, DenseVoxels::new());
                }
            }
            VoxelUpdateKind::Dense(voxels) => {
                self.regions.insert(update.region, voxels.clone());
            }
            VoxelUpdateKind::Sparse(edits) => {
                let region = self.regions.entry(update.region).or_default();
                for edit in edits {
                    region.set(edit.pos, edit.material);
                }
            }
        }
    }

    /// Solid voxel positions sorted by (y, z, x)
    pub fn solid_voxels(&self) -> Vec<IVec3> {
        let mut out = Vec::new();
        for (region, voxels) in &self.regions {
            for (index, material) in voxels.as_bytes().iter().enumerate() {
                if !is_solid(*material) {
                    continue;
                }
                // Dense index and packed position share a layout
                if let Ok(local) = LocalVoxelPos::unpack(index as u16) {
                    out.push(local.in_region(*region));
                }
            }
        }
        out.sort_by_key(|p| (p.y, p.z, p.x));
        out
    }

    pub fn solid_bounds(&self) -> Option<IAabb> {
        let mut voxels = self.solid_voxels().into_iter();
        let first = voxels.next()?;
        Some(voxels.fold(IAabb::new(first, first), |aabb, p| aabb.grow(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(min: IVec3, max: IVec3) -> VoxelTerrain {
        VoxelTerrain::new(&VoxelBodyDesc::new(min, max))
    }

    fn local(x: u32, y: u32, z: u32) -> LocalVoxelPos {
        LocalVoxelPos::new(x, y, z).unwrap()
    }

    #[test]
    fn test_defined_region_starts_unloaded() {
        let t = terrain(IVec3::ZERO, IVec3::splat(15));
        assert_eq!(t.state(IVec3::ZERO), VoxelState::Unloaded);
        assert_eq!(t.state(IVec3::new(16, 0, 0)), VoxelState::Material(materials::AIR));
    }

    #[test]
    fn test_empty_update_loads_region() {
        let mut t = terrain(IVec3::new(16, 0, -16), IVec3::new(31, 15, -1));
        t.apply(&VoxelShapeUpdate::empty(IVec3::ZERO, true, true));
        assert_eq!(t.state(IVec3::new(18, 0, -5)), VoxelState::Unloaded);

        t.apply(&VoxelShapeUpdate::empty(IVec3::new(1, 0, -1), true, true));
        assert_eq!(t.state(IVec3::new(18, 0, -5)), VoxelState::Material(materials::AIR));
    }

    #[test]
    fn test_empty_without_overwrite_keeps_voxels() {
        let mut t = terrain(IVec3::ZERO, IVec3::splat(15));
        let mut sparse = VoxelShapeUpdate::sparse(IVec3::ZERO, true);
        sparse.add_sparse(local(1, 2, 3), materials::SOLID);
        t.apply(&sparse);

        t.apply(&VoxelShapeUpdate::empty(IVec3::ZERO, true, false));
        assert_eq!(t.state(IVec3::new(1, 2, 3)), VoxelState::Material(materials::SOLID));

        t.apply(&VoxelShapeUpdate::empty(IVec3::ZERO, true, true));
        assert_eq!(t.state(IVec3::new(1, 2, 3)), VoxelState::Material(materials::AIR));
    }

    #[test]
    fn test_later_sparse_edits_win() {
        let mut t = terrain(IVec3::ZERO, IVec3::splat(15));
        let mut sparse = VoxelShapeUpdate::sparse(IVec3::ZERO, true);
        sparse
            .add_sparse(local(0, 0, 0), materials::SOLID)
            .add_sparse(local(0, 0, 0), materials::WATER);
        t.apply(&sparse);
        assert_eq!(t.state(IVec3::ZERO), VoxelState::Material(materials::WATER));
    }

    #[test]
    fn test_solid_voxels_and_bounds() {
        let mut t = terrain(IVec3::ZERO, IVec3::ZERO);
        assert_eq!(t.solid_bounds(), None);

        let mut dense = DenseVoxels::new();
        dense.set(local(1, 1, 1), materials::SOLID);
        dense.set(local(2, 2, 2), materials::SOLID);
        dense.set(local(3, 3, 3), materials::LAVA);
        t.apply(&VoxelShapeUpdate::dense(IVec3::ZERO, true, dense));

        let mut sparse = VoxelShapeUpdate::sparse(IVec3::new(-1, 0, 0), true);
        sparse.add_sparse(local(15, 0, 0), materials::SOLID);
        t.apply(&sparse);

        assert_eq!(
            t.solid_voxels(),
            vec![IVec3::new(-1, 0, 0), IVec3::new(1, 1, 1), IVec3::new(2, 2, 2)]
        );
        assert_eq!(
            t.solid_bounds(),
            Some(IAabb::new(IVec3::new(-1, 0, 0), IVec3::new(2, 2, 2)))
        );
    }

    #[test]
    fn test_region_outside_total_bounds_ignored() {
        let mut t = terrain(IVec3::ZERO, IVec3::ZERO);
        t.apply(&VoxelShapeUpdate::empty(IVec3::new(100, 0, 0), true, true));
        assert!(!t.is_region_loaded(IVec3::new(100, 0, 0)));
    }

    #[test]
    fn test_extreme_regions_skipped_without_overflow() {
        let mut t = terrain(IVec3::ZERO, IVec3::ZERO);
        for region in [
            IVec3::new(i32::MAX / 8, 0, 0),
            IVec3::new(0, i32::MIN, 0),
            IVec3::splat(i32::MAX),
        ] {
            t.apply(&VoxelShapeUpdate::empty(region, true, true));
            assert!(!t.is_region_loaded(region));
        }
    }

    #[test]
    fn test_total_bounds_edges_in_region_space() {
        // Default total region is -128..=127, i.e. regions -8..=7
        let mut t = terrain(IVec3::ZERO, IVec3::ZERO);
        for (region, loaded) in [
            (IVec3::splat(-8), true),
            (IVec3::splat(7), true),
            (IVec3::new(-9, 0, 0), false),
            (IVec3::new(0, 8, 0), false),
        ] {
            t.apply(&VoxelShapeUpdate::empty(region, true, true));
            assert_eq!(t.is_region_loaded(region), loaded, "region {region}");
        }
    }
}
