//! Per-source statistics and spectral profiles from a cube/mask pair.
#![allow(clippy::cast_precision_loss)]

use cubemask_core::{Error, MaskVolume, RegionBox, Result, VoxelCoord, VoxelCube};
use rayon::prelude::*;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Region a spectral profile is summed over in each Z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProfileMode {
    /// Every voxel of the source's XY bounding box.
    #[default]
    BoundingBox,
    /// Only voxels labelled with the source.
    MaskedOnly,
}

/// Summary of one labelled source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceStats {
    /// Source id (mask label).
    pub id: i16,
    /// Inclusive bounding box of the labelled voxels.
    pub bounds: RegionBox,
    /// Number of labelled voxels.
    pub voxel_count: usize,
    /// Labelled voxels with a non-NaN value.
    pub valid_count: usize,
    /// Summed intensity.
    pub sum: f64,
    /// Smallest intensity (NaN if every voxel is blank).
    pub min: f32,
    /// Largest intensity (NaN if every voxel is blank).
    pub max: f32,
    /// Mean intensity over `valid_count` voxels.
    pub mean: f64,
    /// Voxel holding `max`.
    pub peak: Option<VoxelCoord>,
    /// Summed intensity per Z plane, if requested.
    pub profile: Option<Vec<f64>>,
}

impl SourceStats {
    /// Fills in [`SourceStats::profile`].
    ///
    /// # Errors
    /// As [`spectral_profile`].
    pub fn attach_profile(
        &mut self,
        cube: &VoxelCube,
        mask: &MaskVolume,
        mode: ProfileMode,
    ) -> Result<()> {
        self.profile = Some(spectral_profile(cube, mask, self.id, mode)?);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SourceAccumulator {
    bounds: RegionBox,
    count: usize,
    valid: usize,
    sum: f64,
    min: f32,
    max: f32,
    peak: Option<VoxelCoord>,
}

impl SourceAccumulator {
    fn new(coord: VoxelCoord) -> Self {
        Self {
            bounds: RegionBox::single(coord),
            count: 0,
            valid: 0,
            sum: 0.0,
            min: f32::NAN,
            max: f32::NAN,
            peak: None,
        }
    }

    fn push(&mut self, coord: VoxelCoord, value: f32) {
        self.bounds.expand(coord);
        self.count += 1;
        if value.is_nan() {
            return;
        }
        self.valid += 1;
        self.sum += f64::from(value);
        if self.min.is_nan() || value < self.min {
            self.min = value;
        }
        if self.max.is_nan() || value > self.max {
            self.max = value;
            self.peak = Some(coord);
        }
    }

    fn merge(&mut self, other: Self) {
        self.bounds.expand(other.bounds.min());
        self.bounds.expand(other.bounds.max());
        self.count += other.count;
        self.valid += other.valid;
        self.sum += other.sum;
        if self.min.is_nan() || other.min < self.min {
            self.min = other.min;
        }
        if self.max.is_nan() || other.max > self.max {
            self.max = other.max;
            self.peak = other.peak;
        }
    }

    fn finish(self, id: i16) -> SourceStats {
        let mean = if self.valid == 0 {
            f64::NAN
        } else {
            self.sum / self.valid as f64
        };
        SourceStats {
            id,
            bounds: self.bounds,
            voxel_count: self.count,
            valid_count: self.valid,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean,
            peak: self.peak,
            profile: None,
        }
    }
}

type Accumulators = BTreeMap<i16, SourceAccumulator>;

fn merge_maps(mut a: Accumulators, b: Accumulators) -> Accumulators {
    for (id, acc) in b {
        match a.get_mut(&id) {
            Some(existing) => existing.merge(acc),
            None => {
                a.insert(id, acc);
            }
        }
    }
    a
}

/// Statistics of every positive label in `mask`, sorted by id.
///
/// # Errors
/// Returns [`Error::DimensionMismatch`] if the grids differ.
#[allow(clippy::cast_possible_wrap)]
pub fn source_statistics(cube: &VoxelCube, mask: &MaskVolume) -> Result<Vec<SourceStats>> {
    let dims = cube.dims();
    mask.ensure_dims(dims)?;
    let values = cube.data();
    let labels = mask.data();
    let plane = dims.plane_len();

    let merged = (0..dims.z)
        .into_par_iter()
        .fold(Accumulators::new, |mut map, z| {
            let start = z * plane;
            for (i, (&label, &value)) in labels[start..start + plane]
                .iter()
                .zip(&values[start..start + plane])
                .enumerate()
            {
                if label <= 0 {
                    continue;
                }
                let coord = VoxelCoord::new((i % dims.x) as i64, (i / dims.x) as i64, z as i64);
                map.entry(label)
                    .or_insert_with(|| SourceAccumulator::new(coord))
                    .push(coord, value);
            }
            map
        })
        .reduce(Accumulators::new, merge_maps);

    let stats: Vec<SourceStats> = merged
        .into_iter()
        .map(|(id, acc)| acc.finish(id))
        .collect();
    log::debug!("collected statistics for {} sources", stats.len());
    Ok(stats)
}

/// Bounding box of the voxels labelled `id`, `None` if there are none.
#[must_use]
pub fn source_bounds(mask: &MaskVolume, id: i16) -> Option<RegionBox> {
    let dims = mask.dims();
    mask.data()
        .iter()
        .enumerate()
        .filter(|&(_, &label)| label == id)
        .fold(None, |acc: Option<RegionBox>, (index, _)| {
            let coord = dims.coord_of(index);
            Some(match acc {
                Some(mut bounds) => {
                    bounds.expand(coord);
                    bounds
                }
                None => RegionBox::single(coord),
            })
        })
}

/// Intensity summed per Z plane for source `id`, one entry per plane of the
/// cube. NaN voxels are skipped.
///
/// # Errors
/// [`Error::InvalidSourceId`] for ids below one, [`Error::UnknownSource`] if
/// no voxel carries `id`, and [`Error::DimensionMismatch`] if the grids
/// differ.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn spectral_profile(
    cube: &VoxelCube,
    mask: &MaskVolume,
    id: i16,
    mode: ProfileMode,
) -> Result<Vec<f64>> {
    if id < 1 {
        return Err(Error::InvalidSourceId(id));
    }
    let dims = cube.dims();
    mask.ensure_dims(dims)?;
    let bounds = source_bounds(mask, id).ok_or(Error::UnknownSource(id))?;
    let (min, max) = (bounds.min(), bounds.max());
    let (x0, x1) = (min.x as usize, max.x as usize);
    let (y0, y1) = (min.y as usize, max.y as usize);
    let values = cube.data();
    let labels = mask.data();

    Ok((0..dims.z)
        .into_par_iter()
        .map(|z| {
            let mut sum = 0.0f64;
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let index = dims.offset_unchecked(x, y, z);
                    let value = values[index];
                    if value.is_nan() {
                        continue;
                    }
                    if mode == ProfileMode::MaskedOnly && labels[index] != id {
                        continue;
                    }
                    sum += f64::from(value);
                }
            }
            sum
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cubemask_core::Dims;

    fn pair() -> (VoxelCube, MaskVolume) {
        let dims = Dims::new(4, 4, 3);
        let data = (0..dims.len()).map(|i| i as f32).collect();
        let cube = VoxelCube::from_vec(data, dims).unwrap();
        let mut mask = MaskVolume::allocate(dims).unwrap();
        mask.set_voxel(1, 1, 0, 2).unwrap();
        mask.set_voxel(2, 1, 2, 2).unwrap();
        mask.set_voxel(3, 3, 1, 7).unwrap();
        mask.set_voxel(0, 0, 0, -1).unwrap();
        (cube, mask)
    }

    #[test]
    fn test_statistics_per_source() {
        let (cube, mask) = pair();
        let stats = source_statistics(&cube, &mask).unwrap();
        assert_eq!(stats.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 7]);

        let s = &stats[0];
        assert_eq!(s.voxel_count, 2);
        assert_eq!(s.bounds.min(), VoxelCoord::new(1, 1, 0));
        assert_eq!(s.bounds.max(), VoxelCoord::new(2, 1, 2));
        // offsets 5 and 38
        assert_relative_eq!(s.sum, 43.0);
        assert_relative_eq!(s.mean, 21.5);
        assert_relative_eq!(s.min, 5.0);
        assert_relative_eq!(s.max, 38.0);
        assert_eq!(s.peak, Some(VoxelCoord::new(2, 1, 2)));

        assert_eq!(stats[1].voxel_count, 1);
        assert_relative_eq!(stats[1].sum, 31.0);
    }

    #[test]
    fn test_blank_voxels_count_but_do_not_contribute() {
        let dims = Dims::new(2, 1, 1);
        let cube = VoxelCube::from_vec(vec![f32::NAN, f32::NAN], dims).unwrap();
        let mask = MaskVolume::from_vec(vec![4, 4], dims).unwrap();
        let stats = source_statistics(&cube, &mask).unwrap();
        assert_eq!(stats[0].voxel_count, 2);
        assert_eq!(stats[0].valid_count, 0);
        assert!(stats[0].mean.is_nan());
        assert_eq!(stats[0].peak, None);
    }

    #[test]
    fn test_profiles() {
        let (cube, mask) = pair();
        // bounding box x 1..=2, y 1 across all planes
        let boxed = spectral_profile(&cube, &mask, 2, ProfileMode::BoundingBox).unwrap();
        assert_eq!(boxed.len(), 3);
        assert_relative_eq!(boxed[0], 5.0 + 6.0);
        assert_relative_eq!(boxed[1], 21.0 + 22.0);
        assert_relative_eq!(boxed[2], 37.0 + 38.0);

        let masked = spectral_profile(&cube, &mask, 2, ProfileMode::MaskedOnly).unwrap();
        assert_relative_eq!(masked[0], 5.0);
        assert_relative_eq!(masked[1], 0.0);
        assert_relative_eq!(masked[2], 38.0);
    }

    #[test]
    fn test_profile_errors() {
        let (cube, mask) = pair();
        assert_eq!(
            spectral_profile(&cube, &mask, 3, ProfileMode::BoundingBox),
            Err(Error::UnknownSource(3))
        );
        assert_eq!(
            spectral_profile(&cube, &mask, -1, ProfileMode::MaskedOnly),
            Err(Error::InvalidSourceId(-1))
        );
    }

    #[test]
    fn test_attach_profile() {
        let (cube, mask) = pair();
        let mut stats = source_statistics(&cube, &mask).unwrap();
        stats[1].attach_profile(&cube, &mask, ProfileMode::MaskedOnly).unwrap();
        assert_eq!(stats[1].profile.as_deref(), Some(&[0.0, 31.0, 0.0][..]));
    }
}
