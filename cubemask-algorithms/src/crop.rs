//! Crop and nearest-neighbour downsampling of a cube/mask pair.
//!
//! Output voxel `i` along an axis is source voxel `origin + i * factor`.
//! Values are copied, never averaged, so mask labels survive unchanged.

use cubemask_core::{
    Dims, Error, MaskVolume, RegionBox, Result, VoxelCoord, VoxelCube, VoxelDelta,
};
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-axis sampling stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DownsampleFactor {
    /// Stride along X.
    pub x: usize,
    /// Stride along Y.
    pub y: usize,
    /// Stride along Z.
    pub z: usize,
}

impl Default for DownsampleFactor {
    fn default() -> Self {
        Self::uniform(1)
    }
}

impl DownsampleFactor {
    /// Creates a factor.
    #[must_use]
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Same stride on every axis.
    #[must_use]
    pub fn uniform(f: usize) -> Self {
        Self::new(f, f, f)
    }

    /// Strides as an array.
    #[must_use]
    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }

    /// True for a pure crop.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.as_array() == [1, 1, 1]
    }

    /// Checks every stride is at least one.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFactor`] naming the first bad axis.
    pub fn validate(&self) -> Result<()> {
        for (axis, factor) in ['x', 'y', 'z'].into_iter().zip(self.as_array()) {
            if factor < 1 {
                return Err(Error::InvalidFactor { axis, factor });
            }
        }
        Ok(())
    }

    /// Output size for a region of `extent` voxels: `ceil(extent / factor)`.
    ///
    /// Assumes a validated factor.
    #[must_use]
    pub fn output_dims(&self, extent: Dims) -> Dims {
        Dims::new(
            extent.x.div_ceil(self.x),
            extent.y.div_ceil(self.y),
            extent.z.div_ceil(self.z),
        )
    }

    /// Smallest factors that bring a region of `extent` voxels under
    /// `max_voxels`, growing the stride of the longest output axis first.
    ///
    /// A budget below one voxel is treated as one.
    #[must_use]
    pub fn fit_within(extent: Dims, max_voxels: usize) -> Self {
        let budget = max_voxels.max(1);
        let mut factor = Self::default();
        loop {
            let out = factor.output_dims(extent);
            if out.len() <= budget {
                return factor;
            }
            let lens = [out.x, out.y, out.z];
            let longest = (0..3).max_by_key(|&i| (lens[i], 2 - i)).unwrap_or(0);
            match longest {
                0 => factor.x += 1,
                1 => factor.y += 1,
                _ => factor.z += 1,
            }
        }
    }
}

/// Product of [`crop_and_downsample`]: an independent cube/mask pair plus the
/// mapping back to the source grid.
#[derive(Debug, Clone)]
pub struct CropResult {
    /// Cropped (and possibly downsampled) data.
    pub cube: VoxelCube,
    /// Mask on the same grid as `cube`; an independent copy.
    pub mask: MaskVolume,
    /// Source-space voxel of output voxel `(0, 0, 0)`.
    pub origin: VoxelCoord,
    /// Strides used.
    pub factor: DownsampleFactor,
}

impl CropResult {
    /// Source-space coordinate of an output voxel.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn to_source(&self, coord: VoxelCoord) -> VoxelCoord {
        VoxelCoord::new(
            self.origin.x + coord.x * self.factor.x as i64,
            self.origin.y + coord.y * self.factor.y as i64,
            self.origin.z + coord.z * self.factor.z as i64,
        )
    }
}

/// Extracts `region` (inclusive, normalised against the cube) and keeps
/// every `factor`-th voxel per axis.
///
/// Cube and mask are filled by the same index walk, so they always share a
/// grid. Statistics of the new cube are recomputed with the source's
/// histogram bin count.
///
/// # Errors
/// [`Error::InvalidFactor`] for a stride below one and
/// [`Error::DimensionMismatch`] if the mask and cube grids differ. No partial
/// output is produced.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn crop_and_downsample(
    cube: &VoxelCube,
    mask: &MaskVolume,
    region: &RegionBox,
    factor: DownsampleFactor,
) -> Result<CropResult> {
    factor.validate()?;
    let dims = cube.dims();
    mask.ensure_dims(dims)?;

    let region = region.normalized(dims);
    let origin = region.min();
    let out = factor.output_dims(region.extent());
    let (x0, y0, z0) = (origin.x as usize, origin.y as usize, origin.z as usize);

    let source_values = cube.data();
    let source_labels = mask.data();
    let planes: Vec<(Vec<f32>, Vec<i16>)> = (0..out.z)
        .into_par_iter()
        .map(|k| {
            let z = z0 + k * factor.z;
            let mut values = Vec::with_capacity(out.plane_len());
            let mut labels = Vec::with_capacity(out.plane_len());
            for j in 0..out.y {
                let y = y0 + j * factor.y;
                for i in 0..out.x {
                    let index = dims.offset_unchecked(x0 + i * factor.x, y, z);
                    values.push(source_values[index]);
                    labels.push(source_labels[index]);
                }
            }
            (values, labels)
        })
        .collect();

    let mut values = Vec::with_capacity(out.len());
    let mut labels = Vec::with_capacity(out.len());
    for (v, l) in planes {
        values.extend_from_slice(&v);
        labels.extend_from_slice(&l);
    }

    log::debug!(
        "cropped {dims} at {origin} with stride {:?} to {out}",
        factor.as_array()
    );

    Ok(CropResult {
        cube: VoxelCube::with_histogram_bins(values, out, cube.histogram().bins.len())?,
        mask: MaskVolume::from_vec(labels, out)?,
        origin,
        factor,
    })
}

/// Writes a mask edited on a pure crop back into the full-resolution mask.
///
/// `origin` is the crop's origin in `full`. Returns the applied changes so the
/// caller can record them for undo.
///
/// # Errors
/// Returns [`Error::OutOfBounds`] if the cropped grid does not fit inside
/// `full` at `origin`; `full` is untouched then.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn paste_mask(
    full: &mut MaskVolume,
    cropped: &MaskVolume,
    origin: VoxelCoord,
) -> Result<Vec<VoxelDelta>> {
    let dims = full.dims();
    let sub = cropped.dims();
    let far = VoxelCoord::new(
        origin.x + sub.x as i64 - 1,
        origin.y + sub.y as i64 - 1,
        origin.z + sub.z as i64 - 1,
    );
    dims.offset(origin)?;
    dims.offset(far)?;

    let (x0, y0, z0) = (origin.x as usize, origin.y as usize, origin.z as usize);
    let mut deltas = Vec::new();
    for z in 0..sub.z {
        for y in 0..sub.y {
            for x in 0..sub.x {
                let new = cropped.data()[sub.offset_unchecked(x, y, z)];
                let index = dims.offset_unchecked(x0 + x, y0 + y, z0 + z);
                let old = full.data()[index];
                if old != new {
                    deltas.push(VoxelDelta::new(index, old, new));
                }
            }
        }
    }
    full.apply_deltas(&deltas, true)?;
    Ok(deltas)
}
