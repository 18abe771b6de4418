//! Dense 3D voxel cube with statistics and histogram.
//!
//! Data is stored in row-major order with X fastest:
//! `data[z * dim_y * dim_x + y * dim_x + x]`.
//!
//! # Memory Layout
//!
//! A 1024 × 1024 × 512 cube of `f32` needs 2 GiB; the statistics pass runs in
//! parallel chunks and never copies the data.
#![allow(clippy::cast_precision_loss)]

use crate::dims::{Axis, Dims, VoxelCoord};
use crate::error::{Error, Result};
use crate::region::RegionBox;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of histogram bins.
pub const DEFAULT_HISTOGRAM_BINS: usize = 256;

const CHUNK: usize = 1 << 16;

/// Summary statistics over the non-NaN voxels of a cube or region.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CubeStatistics {
    /// Smallest non-NaN value (NaN if there is none).
    pub min: f32,
    /// Largest non-NaN value (NaN if there is none).
    pub max: f32,
    /// Mean of the non-NaN values.
    pub mean: f64,
    /// Population standard deviation of the non-NaN values.
    pub std_dev: f64,
    /// Number of non-NaN voxels.
    pub valid_count: usize,
    /// Number of NaN (blank) voxels.
    pub nan_count: usize,
    /// Set when every voxel is NaN; all aggregates are NaN then.
    pub all_nan: bool,
}

/// Streaming accumulator (Welford, merged with Chan's formula).
#[derive(Debug, Clone, Copy)]
struct StatsAccumulator {
    count: usize,
    nan: usize,
    mean: f64,
    m2: f64,
    min: f32,
    max: f32,
    // extrema of the finite values only
    lo: f32,
    hi: f32,
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            nan: 0,
            mean: 0.0,
            m2: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            lo: f32::INFINITY,
            hi: f32::NEG_INFINITY,
        }
    }
}

impl StatsAccumulator {
    #[inline]
    fn push(&mut self, value: f32) {
        if value.is_nan() {
            self.nan += 1;
            return;
        }
        self.count += 1;
        let v = f64::from(value);
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if value.is_finite() {
            self.lo = self.lo.min(value);
            self.hi = self.hi.max(value);
        }
    }

    fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return Self {
                nan: self.nan + other.nan,
                ..other
            };
        }
        if other.count == 0 {
            return Self {
                nan: self.nan + other.nan,
                ..self
            };
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let weight = other.count as f64 / count as f64;
        Self {
            count,
            nan: self.nan + other.nan,
            mean: self.mean + delta * weight,
            m2: self.m2 + other.m2 + delta * delta * self.count as f64 * weight,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    /// Histogram window over the finite values; `[0, 0]` if there are none.
    fn finite_window(&self) -> (f32, f32) {
        if self.lo <= self.hi {
            (self.lo, self.hi)
        } else {
            (0.0, 0.0)
        }
    }

    fn finish(self) -> CubeStatistics {
        if self.count == 0 {
            return CubeStatistics {
                min: f32::NAN,
                max: f32::NAN,
                mean: f64::NAN,
                std_dev: f64::NAN,
                valid_count: 0,
                nan_count: self.nan,
                all_nan: true,
            };
        }
        CubeStatistics {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std_dev: (self.m2 / self.count as f64).sqrt(),
            valid_count: self.count,
            nan_count: self.nan,
            all_nan: false,
        }
    }
}

/// Histogram of cube values over a display window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    /// Counts per bin.
    pub bins: Vec<u64>,
    /// Lower edge of the first bin.
    pub min: f32,
    /// Upper edge of the last bin.
    pub max: f32,
    /// Width of each bin.
    pub bin_width: f64,
}

impl Histogram {
    /// Total number of binned values.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Lower edge of bin `index`.
    #[must_use]
    pub fn bin_start(&self, index: usize) -> f64 {
        f64::from(self.min) + self.bin_width * index as f64
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bin_index(value: f32, min: f32, bin_width: f64, bins: usize) -> usize {
    if bin_width <= 0.0 {
        return 0;
    }
    let pos = ((f64::from(value) - f64::from(min)) / bin_width).floor();
    if pos <= 0.0 {
        0
    } else if pos >= bins as f64 {
        bins - 1
    } else {
        pos as usize
    }
}

fn histogram_of(data: &[f32], min: f32, max: f32, bins: usize) -> Result<Histogram> {
    if bins == 0 {
        return Err(Error::InvalidHistogram("bin count must be at least 1".into()));
    }
    if !min.is_finite() || !max.is_finite() {
        return Err(Error::InvalidHistogram(format!(
            "range [{min}, {max}] is not finite"
        )));
    }
    if min > max {
        return Err(Error::InvalidHistogram(format!(
            "lower bound {min} exceeds upper bound {max}"
        )));
    }
    let bin_width = (f64::from(max) - f64::from(min)) / bins as f64;
    let counts = data
        .par_chunks(CHUNK)
        .fold(
            || vec![0u64; bins],
            |mut acc, chunk| {
                for &v in chunk {
                    if !v.is_nan() {
                        acc[bin_index(v, min, bin_width, bins)] += 1;
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![0u64; bins],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );
    Ok(Histogram {
        bins: counts,
        min,
        max,
        bin_width,
    })
}

/// A dense, read-only 3D grid of `f32` values.
///
/// Contents never change after construction; crop/downsample produces a new
/// cube. Only the histogram window can be moved with
/// [`VoxelCube::update_statistics`].
#[derive(Debug, Clone)]
pub struct VoxelCube {
    data: Vec<f32>,
    dims: Dims,
    statistics: CubeStatistics,
    histogram: Histogram,
}

impl VoxelCube {
    /// Wraps a flat buffer with the default histogram bin count.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidDimensions`] for an empty grid and
    /// [`Error::LengthMismatch`] if `data.len() != dims.len()`.
    pub fn from_vec(data: Vec<f32>, dims: Dims) -> Result<Self> {
        Self::with_histogram_bins(data, dims, DEFAULT_HISTOGRAM_BINS)
    }

    /// Wraps a flat buffer, binning the histogram into `bins` bins over the
    /// full data range.
    ///
    /// # Errors
    /// As [`VoxelCube::from_vec`], plus [`Error::InvalidHistogram`] when
    /// `bins == 0`.
    pub fn with_histogram_bins(data: Vec<f32>, dims: Dims, bins: usize) -> Result<Self> {
        dims.validate()?;
        if data.len() != dims.len() {
            return Err(Error::LengthMismatch {
                dims,
                expected: dims.len(),
                actual: data.len(),
            });
        }
        let accumulated = accumulate(&data);
        // infinities fall into the edge bins
        let (lo, hi) = accumulated.finite_window();
        let histogram = histogram_of(&data, lo, hi, bins)?;
        let statistics = accumulated.finish();
        log::debug!(
            "loaded {dims} cube: min={} max={} nan={}",
            statistics.min,
            statistics.max,
            statistics.nan_count
        );
        Ok(Self {
            data,
            dims,
            statistics,
            histogram,
        })
    }

    /// Grid dimensions.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Flat voxel data.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the cube and returns its buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Statistics computed at construction.
    #[inline]
    #[must_use]
    pub fn statistics(&self) -> &CubeStatistics {
        &self.statistics
    }

    /// Current histogram.
    #[inline]
    #[must_use]
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Width of the current histogram bins.
    #[inline]
    #[must_use]
    pub fn histogram_bin_width(&self) -> f64 {
        self.histogram.bin_width
    }

    /// Value at `(x, y, z)`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an index outside the grid.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Result<f32> {
        Ok(self.data[self.dims.offset_of(x, y, z)?])
    }

    /// Value at a signed coordinate.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for a coordinate outside the grid.
    pub fn voxel_at(&self, coord: VoxelCoord) -> Result<f32> {
        Ok(self.data[self.dims.offset(coord)?])
    }

    /// Recomputes min/max/mean/std-dev over the whole cube.
    #[must_use]
    pub fn compute_statistics(&self) -> CubeStatistics {
        statistics_of(&self.data)
    }

    /// Statistics restricted to a region (normalised against the cube).
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn region_statistics(&self, region: &RegionBox) -> CubeStatistics {
        let region = region.normalized(self.dims);
        let (min, max) = (region.min(), region.max());
        let (x0, x1) = (min.x as usize, max.x as usize);
        let acc = (min.z as usize..=max.z as usize)
            .into_par_iter()
            .map(|z| {
                let mut acc = StatsAccumulator::default();
                for y in min.y as usize..=max.y as usize {
                    let row = self.dims.offset_unchecked(0, y, z);
                    for &v in &self.data[row + x0..=row + x1] {
                        acc.push(v);
                    }
                }
                acc
            })
            .reduce(StatsAccumulator::default, StatsAccumulator::merge);
        acc.finish()
    }

    /// Bins non-NaN values linearly over `[min, max]`.
    ///
    /// Values outside the range land in the first or last bin.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHistogram`] if `bins == 0`, a bound is not
    /// finite, or `min > max`.
    pub fn compute_histogram(&self, min: f32, max: f32, bins: usize) -> Result<Vec<u64>> {
        histogram_of(&self.data, min, max, bins).map(|h| h.bins)
    }

    /// Re-bins the stored histogram over a new display window.
    ///
    /// The bin count is kept. Cube contents are untouched.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHistogram`] for an invalid window.
    pub fn update_statistics(&mut self, min: f32, max: f32) -> Result<()> {
        let bins = self.histogram.bins.len();
        self.histogram = histogram_of(&self.data, min, max, bins)?;
        Ok(())
    }

    /// 1D profile along `axis` with the two other coordinates fixed.
    ///
    /// `fixed_a` and `fixed_b` are the remaining axes in x, y, z order, so a
    /// spectrum (`Axis::Z`) takes `(x, y)`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if a fixed coordinate is invalid.
    pub fn profile(&self, axis: Axis, fixed_a: usize, fixed_b: usize) -> Result<Vec<f32>> {
        let start = match axis {
            Axis::X => self.dims.offset_of(0, fixed_a, fixed_b)?,
            Axis::Y => self.dims.offset_of(fixed_a, 0, fixed_b)?,
            Axis::Z => self.dims.offset_of(fixed_a, fixed_b, 0)?,
        };
        let stride = self.dims.stride(axis);
        Ok((0..self.dims.get(axis))
            .map(|i| self.data[start + i * stride])
            .collect())
    }

    /// Plane perpendicular to `axis` at `index`.
    ///
    /// Layout matches [`Dims::plane_shape`]: width along the first remaining
    /// axis, row-major.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `index` is past the end of `axis`.
    #[allow(clippy::cast_possible_wrap)]
    pub fn slice(&self, axis: Axis, index: usize) -> Result<Vec<f32>> {
        if index >= self.dims.get(axis) {
            let mut coord = VoxelCoord::default();
            match axis {
                Axis::X => coord.x = index as i64,
                Axis::Y => coord.y = index as i64,
                Axis::Z => coord.z = index as i64,
            }
            return Err(Error::OutOfBounds {
                coord,
                dims: self.dims,
            });
        }
        if axis == Axis::Z {
            let plane = self.dims.plane_len();
            return Ok(self.data[index * plane..(index + 1) * plane].to_vec());
        }
        let (a, b) = axis.others();
        let (width, height) = self.dims.plane_shape(axis);
        let base = index * self.dims.stride(axis);
        let (sa, sb) = (self.dims.stride(a), self.dims.stride(b));
        let mut out = Vec::with_capacity(width * height);
        for j in 0..height {
            for i in 0..width {
                out.push(self.data[base + i * sa + j * sb]);
            }
        }
        Ok(out)
    }
}

fn statistics_of(data: &[f32]) -> CubeStatistics {
    accumulate(data).finish()
}

fn accumulate(data: &[f32]) -> StatsAccumulator {
    data.par_chunks(CHUNK)
        .map(|chunk| {
            let mut acc = StatsAccumulator::default();
            for &v in chunk {
                acc.push(v);
            }
            acc
        })
        .reduce(StatsAccumulator::default, StatsAccumulator::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[allow(clippy::cast_precision_loss)]
    fn ramp(dims: Dims) -> VoxelCube {
        let data = (0..dims.len()).map(|i| i as f32).collect();
        VoxelCube::from_vec(data, dims).unwrap()
    }

    #[test]
    fn test_length_mismatch() {
        let err = VoxelCube::from_vec(vec![0.0; 7], Dims::new(2, 2, 2)).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 8,
                actual: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(matches!(
            VoxelCube::from_vec(Vec::new(), Dims::new(0, 2, 2)),
            Err(Error::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_voxel_access() {
        let cube = ramp(Dims::new(4, 3, 2));
        assert_eq!(cube.voxel(1, 2, 1).unwrap(), 21.0);
        assert!(matches!(
            cube.voxel(4, 0, 0),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(cube.voxel_at(VoxelCoord::new(0, -1, 0)).is_err());
    }

    #[test]
    fn test_statistics_skip_nan() {
        let data = vec![1.0, 2.0, f32::NAN, 3.0, 4.0, f32::NAN, 5.0, 6.0];
        let cube = VoxelCube::from_vec(data, Dims::new(2, 2, 2)).unwrap();
        let stats = cube.statistics();
        assert_eq!(stats.valid_count, 6);
        assert_eq!(stats.nan_count, 2);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 6.0);
        assert_relative_eq!(stats.mean, 3.5);
        // population variance of 1..=6 is 35/12
        assert_relative_eq!(stats.std_dev, (35.0f64 / 12.0).sqrt(), epsilon = 1e-12);
        assert!(!stats.all_nan);
    }

    #[test]
    fn test_all_nan_flagged() {
        let cube = VoxelCube::from_vec(vec![f32::NAN; 8], Dims::new(2, 2, 2)).unwrap();
        let stats = cube.statistics();
        assert!(stats.all_nan);
        assert!(stats.mean.is_nan());
        assert!(stats.std_dev.is_nan());
        assert_eq!(stats.nan_count, 8);
        assert_eq!(cube.histogram().total(), 0);
    }

    #[test]
    fn test_infinite_voxels_load() {
        let data = vec![1.0, f32::INFINITY, 2.0, f32::NAN, 3.0, f32::NEG_INFINITY, 4.0, 5.0];
        let cube = VoxelCube::from_vec(data, Dims::new(2, 2, 2)).unwrap();
        let stats = cube.statistics();
        assert_eq!(stats.min, f32::NEG_INFINITY);
        assert_eq!(stats.max, f32::INFINITY);
        assert_eq!(stats.valid_count, 7);

        // window spans the finite values, infinities land in the edge bins
        let hist = cube.histogram();
        assert_eq!(hist.min, 1.0);
        assert_eq!(hist.max, 5.0);
        assert_eq!(hist.total(), 7);
        assert_eq!(hist.bins[0], 2);
        assert_eq!(hist.bins[hist.bins.len() - 1], 2);
    }

    #[test]
    fn test_only_infinite_voxels_load() {
        let data = vec![f32::INFINITY, f32::NEG_INFINITY, f32::NAN, f32::INFINITY];
        let cube = VoxelCube::with_histogram_bins(data, Dims::new(2, 2, 1), 4).unwrap();
        assert_eq!(cube.histogram().total(), 3);
        assert!(!cube.statistics().all_nan);
    }

    #[test]
    fn test_histogram_conserves_counts() {
        let mut data: Vec<f32> = (0..1000).map(|i| ((i * 37) % 101) as f32 - 50.0).collect();
        data[10] = f32::NAN;
        data[500] = f32::NAN;
        let cube = VoxelCube::from_vec(data, Dims::new(10, 10, 10)).unwrap();
        let stats = *cube.statistics();
        let hist = cube.compute_histogram(stats.min, stats.max, 17).unwrap();
        assert_eq!(hist.iter().sum::<u64>(), 998);
        assert_eq!(cube.histogram().total(), 998);
    }

    #[test]
    fn test_histogram_clamps_to_edges() {
        let cube = VoxelCube::from_vec(vec![-10.0, 0.0, 0.5, 1.0, 10.0, 0.99, 0.2, 0.7], Dims::new(2, 2, 2)).unwrap();
        let hist = cube.compute_histogram(0.0, 1.0, 2).unwrap();
        // bin 0: -10, 0.0, 0.2 | bin 1: 0.5, 1.0, 10, 0.99, 0.7
        assert_eq!(hist, vec![3, 5]);
        assert!(cube.compute_histogram(0.0, 1.0, 0).is_err());
        assert!(cube.compute_histogram(2.0, 1.0, 4).is_err());
        assert!(cube.compute_histogram(f32::NAN, 1.0, 4).is_err());
    }

    #[test]
    fn test_update_statistics_rebins() {
        let mut cube = ramp(Dims::new(4, 4, 4));
        let bins = cube.histogram().bins.len();
        cube.update_statistics(0.0, 31.0).unwrap();
        assert_eq!(cube.histogram().bins.len(), bins);
        assert_relative_eq!(cube.histogram_bin_width(), 31.0 / bins as f64);
        assert_eq!(cube.histogram().total(), 64);
        // everything above the window piles up in the last bin
        assert!(cube.histogram().bins[bins - 1] >= 32);
    }

    #[test]
    fn test_profile_along_each_axis() {
        let cube = ramp(Dims::new(4, 3, 2));
        assert_eq!(cube.profile(Axis::X, 1, 1).unwrap(), vec![16.0, 17.0, 18.0, 19.0]);
        assert_eq!(cube.profile(Axis::Y, 2, 0).unwrap(), vec![2.0, 6.0, 10.0]);
        assert_eq!(cube.profile(Axis::Z, 3, 2).unwrap(), vec![11.0, 23.0]);
        assert!(cube.profile(Axis::Z, 4, 0).is_err());
        assert!(cube.profile(Axis::X, 0, 2).is_err());
    }

    #[test]
    fn test_slice_layout() {
        let cube = ramp(Dims::new(3, 2, 2));
        assert_eq!(cube.slice(Axis::Z, 1).unwrap(), vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        // Y plane: width along x, height along z
        assert_eq!(cube.slice(Axis::Y, 1).unwrap(), vec![3.0, 4.0, 5.0, 9.0, 10.0, 11.0]);
        // X plane: width along y, height along z
        assert_eq!(cube.slice(Axis::X, 2).unwrap(), vec![2.0, 5.0, 8.0, 11.0]);
        assert!(cube.slice(Axis::Z, 2).is_err());
    }

    #[test]
    fn test_region_statistics() {
        let cube = ramp(Dims::new(4, 4, 4));
        let region = RegionBox::new(VoxelCoord::new(1, 1, 1), VoxelCoord::new(0, 0, 0));
        let stats = cube.region_statistics(&region);
        // voxels 0, 1, 4, 5, 16, 17, 20, 21
        assert_eq!(stats.valid_count, 8);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 21.0);
        assert_relative_eq!(stats.mean, 10.5);
    }
}
