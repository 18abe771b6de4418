//! Grid dimensions, voxel coordinates and axes.

use crate::error::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis of a data cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Axis {
    /// First (fastest-varying) axis, usually right ascension.
    X,
    /// Second axis, usually declination.
    Y,
    /// Third axis, usually the spectral axis.
    Z,
}

impl Axis {
    /// All axes in storage order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Returns the axis position (0, 1 or 2).
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two remaining axes, in x, y, z order.
    #[must_use]
    pub fn others(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }

    /// Lowercase axis letter.
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A voxel position that may lie outside the grid.
///
/// Brush centres and world-to-voxel conversions produce these; they are only
/// turned into storage offsets through [`Dims::offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VoxelCoord {
    /// X index.
    pub x: i64,
    /// Y index.
    pub y: i64,
    /// Z index.
    pub z: i64,
}

impl VoxelCoord {
    /// Creates a new voxel coordinate.
    #[inline]
    #[must_use]
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Returns the component along `axis`.
    #[inline]
    #[must_use]
    pub fn get(&self, axis: Axis) -> i64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Componentwise minimum.
    #[must_use]
    pub fn min(&self, other: &Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Componentwise maximum.
    #[must_use]
    pub fn max(&self, other: &Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Squared Euclidean distance to another coordinate.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> i64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl From<[i64; 3]> for VoxelCoord {
    fn from(v: [i64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Dimensions of a voxel grid.
///
/// Storage is row-major with X fastest: `(x, y, z)` lives at
/// `z * x_len * y_len + y * x_len + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dims {
    /// Length of the X axis.
    pub x: usize,
    /// Length of the Y axis.
    pub y: usize,
    /// Length of the Z axis.
    pub z: usize,
}

impl Dims {
    /// Creates new dimensions. Use [`Dims::validate`] before allocating.
    #[inline]
    #[must_use]
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Checks that every axis is non-empty and the voxel count fits `usize`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDimensions`] otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.x == 0 || self.y == 0 || self.z == 0 {
            return Err(Error::InvalidDimensions(format!(
                "{self} has an empty axis"
            )));
        }
        self.x
            .checked_mul(self.y)
            .and_then(|xy| xy.checked_mul(self.z))
            .map(|_| ())
            .ok_or_else(|| Error::InvalidDimensions(format!("{self} overflows")))
    }

    /// Total number of voxels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.x * self.y * self.z
    }

    /// True if any axis is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of voxels in one XY plane.
    #[inline]
    #[must_use]
    pub fn plane_len(&self) -> usize {
        self.x * self.y
    }

    /// Length along `axis`.
    #[inline]
    #[must_use]
    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// `(width, height)` of the plane perpendicular to `axis`.
    ///
    /// Width runs along the first remaining axis in x, y, z order.
    #[inline]
    #[must_use]
    pub fn plane_shape(&self, axis: Axis) -> (usize, usize) {
        let (a, b) = axis.others();
        (self.get(a), self.get(b))
    }

    /// Distance between neighbouring voxels along `axis` in flat storage.
    #[inline]
    #[must_use]
    pub fn stride(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => 1,
            Axis::Y => self.x,
            Axis::Z => self.x * self.y,
        }
    }

    /// True if `coord` lies inside the grid.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn contains(&self, coord: VoxelCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && coord.z >= 0
            && coord.x < self.x as i64
            && coord.y < self.y as i64
            && coord.z < self.z as i64
    }

    /// Flat storage offset of an in-bounds index triple (unchecked).
    #[inline]
    #[must_use]
    pub fn offset_unchecked(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.x * self.y + y * self.x + x
    }

    /// Flat storage offset of `coord`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `coord` is outside the grid.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn offset(&self, coord: VoxelCoord) -> Result<usize> {
        if !self.contains(coord) {
            return Err(Error::OutOfBounds { coord, dims: *self });
        }
        Ok(self.offset_unchecked(coord.x as usize, coord.y as usize, coord.z as usize))
    }

    /// Flat storage offset of an unsigned index triple.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if any index is out of range.
    #[allow(clippy::cast_possible_wrap)]
    pub fn offset_of(&self, x: usize, y: usize, z: usize) -> Result<usize> {
        if x >= self.x || y >= self.y || z >= self.z {
            return Err(Error::OutOfBounds {
                coord: VoxelCoord::new(x as i64, y as i64, z as i64),
                dims: *self,
            });
        }
        Ok(self.offset_unchecked(x, y, z))
    }

    /// Inverse of [`Dims::offset_unchecked`].
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn coord_of(&self, offset: usize) -> VoxelCoord {
        let plane = self.plane_len();
        let z = offset / plane;
        let rem = offset % plane;
        VoxelCoord::new((rem % self.x) as i64, (rem / self.x) as i64, z as i64)
    }

    /// Largest valid coordinate (`dim - 1` per axis).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn max_coord(&self) -> VoxelCoord {
        VoxelCoord::new(
            self.x as i64 - 1,
            self.y as i64 - 1,
            self.z as i64 - 1,
        )
    }

    /// Clamps `coord` into `[0, dim - 1]` per axis.
    #[must_use]
    pub fn clamp(&self, coord: VoxelCoord) -> VoxelCoord {
        let max = self.max_coord();
        VoxelCoord::new(
            coord.x.clamp(0, max.x.max(0)),
            coord.y.clamp(0, max.y.max(0)),
            coord.z.clamp(0, max.z.max(0)),
        )
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}
