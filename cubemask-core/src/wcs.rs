//! World-coordinate transform seam.
//!
//! Real WCS handling (projections, spectral frames) lives outside the core;
//! the core only needs voxel ↔ world mapping for display and export.
#![allow(clippy::cast_precision_loss)]

use crate::dims::{Axis, VoxelCoord};

/// Maps voxel positions to world coordinates (e.g. RA, Dec, frequency) and back.
///
/// Voxel positions are 0-based and refer to the grid the transform was built
/// for (normally the full, uncropped cube).
pub trait WorldTransform {
    /// Voxel position to world coordinates.
    fn voxel_to_world(&self, voxel: [f64; 3]) -> [f64; 3];

    /// World coordinates to (fractional) voxel position.
    fn world_to_voxel(&self, world: [f64; 3]) -> [f64; 3];

    /// Unit label of a world axis, empty if unknown.
    fn unit(&self, _axis: Axis) -> &str {
        ""
    }
}

/// A transform for a cropped/downsampled cube, expressed through the
/// transform of its source cube.
///
/// Voxel `v` of the derived cube is voxel `origin + v * factor` of the source,
/// so the offset is added back before the source transform is consulted.
#[derive(Debug, Clone, Copy)]
pub struct CroppedTransform<'a, T: ?Sized> {
    inner: &'a T,
    origin: VoxelCoord,
    factor: [usize; 3],
}

impl<'a, T: WorldTransform + ?Sized> CroppedTransform<'a, T> {
    /// Wraps `inner` for a region starting at `origin` sampled every `factor`
    /// voxels.
    pub fn new(inner: &'a T, origin: VoxelCoord, factor: [usize; 3]) -> Self {
        Self {
            inner,
            origin,
            factor,
        }
    }

    /// Source-cube voxel position of a derived-cube position.
    pub fn to_source(&self, voxel: [f64; 3]) -> [f64; 3] {
        [
            self.origin.x as f64 + voxel[0] * self.factor[0] as f64,
            self.origin.y as f64 + voxel[1] * self.factor[1] as f64,
            self.origin.z as f64 + voxel[2] * self.factor[2] as f64,
        ]
    }
}

impl<T: WorldTransform + ?Sized> WorldTransform for CroppedTransform<'_, T> {
    fn voxel_to_world(&self, voxel: [f64; 3]) -> [f64; 3] {
        self.inner.voxel_to_world(self.to_source(voxel))
    }

    fn world_to_voxel(&self, world: [f64; 3]) -> [f64; 3] {
        let source = self.inner.world_to_voxel(world);
        [
            (source[0] - self.origin.x as f64) / self.factor[0] as f64,
            (source[1] - self.origin.y as f64) / self.factor[1] as f64,
            (source[2] - self.origin.z as f64) / self.factor[2] as f64,
        ]
    }

    fn unit(&self, axis: Axis) -> &str {
        self.inner.unit(axis)
    }
}
