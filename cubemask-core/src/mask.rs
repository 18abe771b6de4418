//! Source mask: an int16 grid parallel to a voxel cube.
//!
//! Values: `0` is background, positive values are source ids and `-1` marks
//! excluded voxels. Painting never touches another source's voxels.

use crate::dims::{Dims, VoxelCoord};
use crate::error::{Error, Result};
use crate::region::RegionBox;
use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mask value for background voxels.
pub const BACKGROUND: i16 = 0;

/// Mask value for voxels excluded from source statistics and moment maps.
pub const EXCLUDED: i16 = -1;

/// One voxel change: flat index plus the value before and after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VoxelDelta {
    /// Flat storage index.
    pub index: usize,
    /// Value before the change.
    pub old: i16,
    /// Value after the change.
    pub new: i16,
}

impl VoxelDelta {
    /// Creates a new delta.
    #[inline]
    #[must_use]
    pub fn new(index: usize, old: i16, new: i16) -> Self {
        Self { index, old, new }
    }

    /// The same change, reversed.
    #[inline]
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self::new(self.index, self.new, self.old)
    }
}

/// Mutable int16 label grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskVolume {
    data: Vec<i16>,
    dims: Dims,
    changed: bool,
}

impl MaskVolume {
    /// Allocates an all-background mask.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDimensions`] for an empty grid.
    pub fn allocate(dims: Dims) -> Result<Self> {
        dims.validate()?;
        Ok(Self {
            data: vec![BACKGROUND; dims.len()],
            dims,
            changed: false,
        })
    }

    /// Wraps an existing label buffer (e.g. read from a mask file).
    ///
    /// # Errors
    /// Returns [`Error::InvalidDimensions`] for an empty grid and
    /// [`Error::LengthMismatch`] if the buffer length is wrong.
    pub fn from_vec(data: Vec<i16>, dims: Dims) -> Result<Self> {
        dims.validate()?;
        if data.len() != dims.len() {
            return Err(Error::LengthMismatch {
                dims,
                expected: dims.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            dims,
            changed: false,
        })
    }

    /// Grid dimensions.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Flat label data.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    /// Checks that this mask shares the grid of a cube (or another mask).
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] otherwise.
    pub fn ensure_dims(&self, expected: Dims) -> Result<()> {
        if self.dims == expected {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected,
                actual: self.dims,
            })
        }
    }

    /// True once the mask differs from what was last loaded or saved.
    #[inline]
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Clears the changed flag after a successful save.
    pub fn mark_saved(&mut self) {
        self.changed = false;
    }

    /// Label at `(x, y, z)`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an index outside the grid.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Result<i16> {
        Ok(self.data[self.dims.offset_of(x, y, z)?])
    }

    /// Label at a signed coordinate.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for a coordinate outside the grid.
    pub fn voxel_at(&self, coord: VoxelCoord) -> Result<i16> {
        Ok(self.data[self.dims.offset(coord)?])
    }

    /// Sets the label at `(x, y, z)`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an index outside the grid.
    pub fn set_voxel(&mut self, x: usize, y: usize, z: usize, value: i16) -> Result<()> {
        let index = self.dims.offset_of(x, y, z)?;
        if self.data[index] != value {
            self.data[index] = value;
            self.changed = true;
        }
        Ok(())
    }

    /// Paints a sphere of radius `radius` (in voxels) around `center`.
    ///
    /// `value` is the active source id. Additive painting labels voxels that
    /// are background or already `value`; erasing clears voxels labelled
    /// `value`. Voxels of the footprint outside the grid are skipped.
    ///
    /// Returns exactly the changes applied, in storage order.
    ///
    /// # Errors
    /// [`Error::InvalidSourceId`] if `value <= 0`; [`Error::OutOfBounds`] if
    /// `center` is outside the grid. Nothing is modified on error.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn paint(
        &mut self,
        center: VoxelCoord,
        radius: u32,
        value: i16,
        additive: bool,
    ) -> Result<Vec<VoxelDelta>> {
        if value <= BACKGROUND {
            return Err(Error::InvalidSourceId(value));
        }
        self.dims.offset(center)?;

        let r = i64::from(radius);
        let r2 = r.saturating_mul(r);
        let footprint = RegionBox::new(
            VoxelCoord::new(center.x - r, center.y - r, center.z - r),
            VoxelCoord::new(center.x + r, center.y + r, center.z + r),
        )
        .normalized(self.dims);
        let (min, max) = (footprint.min(), footprint.max());

        let mut deltas = Vec::new();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let coord = VoxelCoord::new(x, y, z);
                    if coord.distance_squared(&center) > r2 {
                        continue;
                    }
                    let index = self.dims.offset_unchecked(x as usize, y as usize, z as usize);
                    let old = self.data[index];
                    let new = if additive {
                        if old != BACKGROUND {
                            continue;
                        }
                        value
                    } else {
                        if old != value {
                            continue;
                        }
                        BACKGROUND
                    };
                    self.data[index] = new;
                    deltas.push(VoxelDelta::new(index, old, new));
                }
            }
        }
        if !deltas.is_empty() {
            self.changed = true;
        }
        Ok(deltas)
    }

    /// Replays deltas: `new` values when `forward`, `old` values otherwise.
    ///
    /// Reverse replay walks the list backwards so that a list touching the
    /// same voxel twice restores the earliest value.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if any index is invalid; nothing is
    /// written in that case.
    pub fn apply_deltas(&mut self, deltas: &[VoxelDelta], forward: bool) -> Result<()> {
        let len = self.data.len();
        if let Some(bad) = deltas.iter().find(|d| d.index >= len) {
            return Err(Error::OutOfBounds {
                coord: self.dims.coord_of(bad.index),
                dims: self.dims,
            });
        }
        if forward {
            for d in deltas {
                self.data[d.index] = d.new;
            }
        } else {
            for d in deltas.iter().rev() {
                self.data[d.index] = d.old;
            }
        }
        if !deltas.is_empty() {
            self.changed = true;
        }
        Ok(())
    }

    /// Distinct positive source ids, ascending.
    #[must_use]
    pub fn source_ids(&self) -> Vec<i16> {
        self.data
            .iter()
            .copied()
            .filter(|&v| v > BACKGROUND)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Smallest id larger than every id in use (at least 1).
    ///
    /// Saturates at `i16::MAX`.
    #[must_use]
    pub fn next_source_id(&self) -> i16 {
        let max = self.data.iter().copied().max().unwrap_or(BACKGROUND);
        max.max(BACKGROUND).saturating_add(1)
    }

    /// Number of voxels labelled `value`.
    #[must_use]
    pub fn voxel_count(&self, value: i16) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }

    /// Resets every voxel of source `id` to background.
    pub fn clear_source(&mut self, id: i16) -> Vec<VoxelDelta> {
        self.relabel(id, BACKGROUND)
    }

    /// Changes every voxel labelled `from` to `to`.
    pub fn relabel(&mut self, from: i16, to: i16) -> Vec<VoxelDelta> {
        if from == to {
            return Vec::new();
        }
        let mut deltas = Vec::new();
        for (index, v) in self.data.iter_mut().enumerate() {
            if *v == from {
                *v = to;
                deltas.push(VoxelDelta::new(index, from, to));
            }
        }
        if !deltas.is_empty() {
            self.changed = true;
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask4() -> MaskVolume {
        MaskVolume::allocate(Dims::new(4, 4, 4)).unwrap()
    }

    #[test]
    fn test_allocate_is_background() {
        let mask = mask4();
        assert!(mask.data().iter().all(|&v| v == BACKGROUND));
        assert!(!mask.is_changed());
    }

    #[test]
    fn test_from_vec_length_checked() {
        assert!(matches!(
            MaskVolume::from_vec(vec![0; 10], Dims::new(2, 2, 2)),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_paint_radius_one_is_cross() {
        let mut mask = mask4();
        let deltas = mask.paint(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
        assert_eq!(deltas.len(), 7);
        assert_eq!(mask.voxel(1, 1, 1).unwrap(), 5);
        assert_eq!(mask.voxel(0, 1, 1).unwrap(), 5);
        assert_eq!(mask.voxel(1, 1, 2).unwrap(), 5);
        // edge neighbour is sqrt(2) away
        assert_eq!(mask.voxel(0, 0, 1).unwrap(), 0);
        assert_eq!(mask.voxel_count(5), 7);
        assert!(mask.is_changed());
    }

    #[test]
    fn test_paint_radius_zero_single_voxel() {
        let mut mask = mask4();
        let deltas = mask.paint(VoxelCoord::new(3, 3, 3), 0, 2, true).unwrap();
        assert_eq!(deltas, vec![VoxelDelta::new(63, 0, 2)]);
    }

    #[test]
    fn test_paint_clips_at_edges() {
        let mut mask = mask4();
        let deltas = mask.paint(VoxelCoord::new(0, 0, 0), 1, 1, true).unwrap();
        // centre plus +x, +y, +z neighbours
        assert_eq!(deltas.len(), 4);
    }

    #[test]
    fn test_paint_out_of_bounds_centre() {
        let mut mask = mask4();
        let err = mask.paint(VoxelCoord::new(4, 0, 0), 2, 1, true).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
        assert!(!mask.is_changed());
    }

    #[test]
    fn test_paint_never_steals_other_sources() {
        let mut mask = mask4();
        mask.set_voxel(1, 1, 1, 3).unwrap();
        mask.set_voxel(2, 1, 1, EXCLUDED).unwrap();
        let deltas = mask.paint(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
        assert_eq!(deltas.len(), 5);
        assert_eq!(mask.voxel(1, 1, 1).unwrap(), 3);
        assert_eq!(mask.voxel(2, 1, 1).unwrap(), EXCLUDED);

        let erased = mask.paint(VoxelCoord::new(1, 1, 1), 2, 5, false).unwrap();
        assert_eq!(erased.len(), 5);
        assert_eq!(mask.voxel(1, 1, 1).unwrap(), 3);
        assert_eq!(mask.voxel_count(5), 0);
    }

    #[test]
    fn test_paint_excludes_noops() {
        let mut mask = mask4();
        mask.paint(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
        let again = mask.paint(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_invalid_source_id() {
        let mut mask = mask4();
        assert_eq!(
            mask.paint(VoxelCoord::new(0, 0, 0), 1, 0, true),
            Err(Error::InvalidSourceId(0))
        );
        assert!(mask.paint(VoxelCoord::new(0, 0, 0), 1, EXCLUDED, true).is_err());
    }

    #[test]
    fn test_apply_deltas_round_trip() {
        let mut mask = mask4();
        let before = mask.clone();
        let deltas = mask.paint(VoxelCoord::new(2, 2, 2), 2, 9, true).unwrap();
        let after = mask.clone();

        mask.apply_deltas(&deltas, false).unwrap();
        assert_eq!(mask.data(), before.data());
        mask.apply_deltas(&deltas, true).unwrap();
        assert_eq!(mask.data(), after.data());
    }

    #[test]
    fn test_apply_deltas_rejects_bad_index() {
        let mut mask = mask4();
        let deltas = [VoxelDelta::new(1, 0, 4), VoxelDelta::new(64, 0, 4)];
        assert!(mask.apply_deltas(&deltas, true).is_err());
        assert_eq!(mask.voxel(1, 0, 0).unwrap(), 0);
    }

    #[test]
    fn test_source_management() {
        let mut mask = mask4();
        assert_eq!(mask.next_source_id(), 1);
        mask.set_voxel(0, 0, 0, 4).unwrap();
        mask.set_voxel(1, 0, 0, 2).unwrap();
        mask.set_voxel(2, 0, 0, 4).unwrap();
        mask.set_voxel(3, 0, 0, EXCLUDED).unwrap();
        assert_eq!(mask.source_ids(), vec![2, 4]);
        assert_eq!(mask.next_source_id(), 5);

        let moved = mask.relabel(4, 7);
        assert_eq!(moved.len(), 2);
        assert_eq!(mask.source_ids(), vec![2, 7]);

        let cleared = mask.clear_source(2);
        assert_eq!(cleared, vec![VoxelDelta::new(1, 2, 0)]);
        assert_eq!(mask.source_ids(), vec![7]);
    }

    #[test]
    fn test_saved_flag() {
        let mut mask = mask4();
        mask.set_voxel(0, 0, 0, 1).unwrap();
        assert!(mask.is_changed());
        mask.mark_saved();
        assert!(!mask.is_changed());
        mask.set_voxel(0, 0, 0, 1).unwrap();
        assert!(!mask.is_changed());
    }
}
