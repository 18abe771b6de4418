//! Moment maps: 2D projections of a cube along one axis.
//!
//! Moment 0 is the summed intensity of the included voxels along the axis;
//! moment 1 is the intensity-weighted mean index along it. Both maps share
//! the plane layout of `Dims::plane_shape`.
#![allow(clippy::cast_precision_loss)]

use cubemask_core::{Axis, Error, MaskVolume, Result, VoxelCube, BACKGROUND, EXCLUDED};
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a map is stretched for display. Does not change the maps themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScaleMode {
    /// Finite minimum to finite maximum.
    #[default]
    MinMax,
    /// IRAF-style zscale around the median.
    ZScale,
}

/// Which of the two maps to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moment {
    /// Integrated intensity.
    Zero,
    /// Intensity-weighted centroid.
    One,
}

/// Moment-0 and moment-1 maps of one projection.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentMaps {
    /// Plane width (first remaining axis).
    pub width: usize,
    /// Plane height (second remaining axis).
    pub height: usize,
    /// Axis that was collapsed.
    pub axis: Axis,
    /// Summed intensity per pixel, row-major.
    pub moment0: Vec<f32>,
    /// Centroid index along `axis`; NaN where moment 0 is zero.
    pub moment1: Vec<f32>,
}

impl MomentMaps {
    /// The requested map.
    #[must_use]
    pub fn map(&self, moment: Moment) -> &[f32] {
        match moment {
            Moment::Zero => &self.moment0,
            Moment::One => &self.moment1,
        }
    }

    /// Value of a map at pixel `(u, v)`, `None` outside the plane.
    #[must_use]
    pub fn pixel(&self, moment: Moment, u: usize, v: usize) -> Option<f32> {
        if u >= self.width || v >= self.height {
            return None;
        }
        Some(self.map(moment)[v * self.width + u])
    }

    /// Colour-scale limits for `map` (finite values only).
    ///
    /// Returns `None` if the map has no finite value.
    #[must_use]
    pub fn display_range(map: &[f32], mode: ScaleMode) -> Option<(f32, f32)> {
        match mode {
            ScaleMode::MinMax => min_max(map),
            ScaleMode::ZScale => zscale(map),
        }
    }
}

/// Collapses `cube` along `axis`.
///
/// Without a mask, a voxel is included if it is finite and strictly above
/// `threshold`. With `use_mask`, a voxel is included if it is finite and its
/// label is a source (neither background nor excluded); `threshold` is then
/// ignored.
///
/// # Errors
/// [`Error::MaskRequired`] if `use_mask` is set without a mask and
/// [`Error::DimensionMismatch`] if the mask grid differs from the cube.
#[allow(clippy::cast_possible_truncation)]
pub fn calculate_moments(
    cube: &VoxelCube,
    mask: Option<&MaskVolume>,
    axis: Axis,
    threshold: f32,
    use_mask: bool,
) -> Result<MomentMaps> {
    let dims = cube.dims();
    let labels = if use_mask {
        let mask = mask.ok_or(Error::MaskRequired)?;
        mask.ensure_dims(dims)?;
        Some(mask.data())
    } else {
        None
    };

    let (width, height) = dims.plane_shape(axis);
    let (a, b) = axis.others();
    let strides = Strides {
        u: dims.stride(a),
        v: dims.stride(b),
        k: dims.stride(axis),
        depth: dims.get(axis),
    };
    let values = cube.data();

    let mut moment0 = vec![0.0f32; width * height];
    let mut moment1 = vec![f32::NAN; width * height];
    moment0
        .par_chunks_mut(width)
        .zip(moment1.par_chunks_mut(width))
        .enumerate()
        .for_each(|(v, (row0, row1))| {
            for u in 0..width {
                let base = u * strides.u + v * strides.v;
                let (sum, weighted) = collapse(values, labels, base, &strides, threshold);
                row0[u] = sum as f32;
                if sum != 0.0 {
                    row1[u] = (weighted / sum) as f32;
                }
            }
        });

    log::debug!("moment maps along {axis}: {width}x{height} from {dims}");
    Ok(MomentMaps {
        width,
        height,
        axis,
        moment0,
        moment1,
    })
}

struct Strides {
    u: usize,
    v: usize,
    k: usize,
    depth: usize,
}

#[inline]
fn collapse(
    values: &[f32],
    labels: Option<&[i16]>,
    base: usize,
    strides: &Strides,
    threshold: f32,
) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut weighted = 0.0f64;
    for k in 0..strides.depth {
        let index = base + k * strides.k;
        let value = values[index];
        if !value.is_finite() {
            continue;
        }
        let included = match labels {
            Some(labels) => {
                let label = labels[index];
                label != BACKGROUND && label != EXCLUDED
            }
            None => value > threshold,
        };
        if included {
            sum += f64::from(value);
            weighted += f64::from(value) * k as f64;
        }
    }
    (sum, weighted)
}

fn min_max(map: &[f32]) -> Option<(f32, f32)> {
    map.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

const ZSCALE_SAMPLES: usize = 1000;
const ZSCALE_CONTRAST: f64 = 0.25;
const ZSCALE_REJECT: f64 = 2.5;
const ZSCALE_ITERATIONS: usize = 5;

/// Fits a line to the sorted sample and widens it around the median, clipped
/// to the sample range.
#[allow(clippy::cast_possible_truncation)]
fn zscale(map: &[f32]) -> Option<(f32, f32)> {
    let finite: Vec<f32> = map.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let step = finite.len().div_ceil(ZSCALE_SAMPLES).max(1);
    let mut samples: Vec<f64> = finite.iter().step_by(step).map(|&v| f64::from(v)).collect();
    samples.sort_by(f64::total_cmp);

    let n = samples.len();
    let (zmin, zmax) = (samples[0], samples[n - 1]);
    let center = n / 2;
    let median = if n % 2 == 1 {
        samples[center]
    } else {
        0.5 * (samples[center - 1] + samples[center])
    };

    let Some(slope) = fit_slope(&samples) else {
        return Some((zmin as f32, zmax as f32));
    };
    let slope = slope / ZSCALE_CONTRAST;
    let z1 = zmin.max(median - center as f64 * slope);
    let z2 = zmax.min(median + (n - center) as f64 * slope);
    Some((z1 as f32, z2 as f32))
}

/// Least-squares slope of `samples[i]` against `i` with iterative sigma
/// clipping. `None` once fewer than half the samples survive.
fn fit_slope(samples: &[f64]) -> Option<f64> {
    let n = samples.len();
    let min_kept = (n / 2).max(5);
    if n < min_kept {
        return None;
    }
    let mut keep = vec![true; n];
    let mut slope = 0.0;
    for _ in 0..ZSCALE_ITERATIONS {
        let (mut sx, mut sy, mut sxx, mut sxy, mut count) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for i in (0..n).filter(|&i| keep[i]) {
            let x = i as f64;
            sx += x;
            sy += samples[i];
            sxx += x * x;
            sxy += x * samples[i];
            count += 1.0;
        }
        let denom = count * sxx - sx * sx;
        if denom == 0.0 {
            return None;
        }
        slope = (count * sxy - sx * sy) / denom;
        let intercept = (sy - slope * sx) / count;

        let residual = |i: usize| samples[i] - (intercept + slope * i as f64);
        let sigma = ((0..n)
            .filter(|&i| keep[i])
            .map(|i| residual(i).powi(2))
            .sum::<f64>()
            / count)
            .sqrt();

        let mut changed = false;
        let mut kept = 0;
        for (i, k) in keep.iter_mut().enumerate() {
            let inside = residual(i).abs() <= ZSCALE_REJECT * sigma;
            changed |= *k != inside;
            *k = inside;
            kept += usize::from(inside);
        }
        if kept < min_kept {
            return None;
        }
        if !changed {
            break;
        }
    }
    Some(slope)
}
