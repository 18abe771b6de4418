//! Region selection over the voxel grid.
//!
//! A [`RegionSelector`] turns two pick points in the host's world space into
//! an axis-aligned [`RegionBox`]. The world-to-voxel mapping is injected by
//! the host through [`VoxelMapping`]; the selector never owns a transform.

use crate::dims::{Dims, VoxelCoord};
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned voxel box given by two (unordered) corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionBox {
    /// First corner, as picked.
    pub start: VoxelCoord,
    /// Second corner, as picked.
    pub end: VoxelCoord,
}

impl RegionBox {
    /// Creates a box from two corners in any order.
    #[must_use]
    pub fn new(start: VoxelCoord, end: VoxelCoord) -> Self {
        Self { start, end }
    }

    /// A box covering exactly one voxel.
    #[must_use]
    pub fn single(coord: VoxelCoord) -> Self {
        Self::new(coord, coord)
    }

    /// A box covering every voxel of `dims`.
    #[must_use]
    pub fn full(dims: Dims) -> Self {
        Self::new(VoxelCoord::default(), dims.max_coord())
    }

    /// Componentwise minimum corner.
    #[must_use]
    pub fn min(&self) -> VoxelCoord {
        self.start.min(&self.end)
    }

    /// Componentwise maximum corner.
    #[must_use]
    pub fn max(&self) -> VoxelCoord {
        self.start.max(&self.end)
    }

    /// Orders the corners and clamps both into `[0, dim - 1]`.
    ///
    /// The result always has `start <= end` componentwise and lies inside
    /// `dims`, so a degenerate selection becomes a one-voxel region.
    #[must_use]
    pub fn normalized(&self, dims: Dims) -> Self {
        Self::new(dims.clamp(self.min()), dims.clamp(self.max()))
    }

    /// Inclusive size of the box per axis.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn extent(&self) -> Dims {
        let min = self.min();
        let max = self.max();
        Dims::new(
            (max.x - min.x + 1) as usize,
            (max.y - min.y + 1) as usize,
            (max.z - min.z + 1) as usize,
        )
    }

    /// Number of voxels covered by the box.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.extent().len()
    }

    /// True if `coord` lies inside the box (inclusive).
    #[must_use]
    pub fn contains(&self, coord: VoxelCoord) -> bool {
        let min = self.min();
        let max = self.max();
        coord.x >= min.x
            && coord.x <= max.x
            && coord.y >= min.y
            && coord.y <= max.y
            && coord.z >= min.z
            && coord.z <= max.z
    }

    /// Voxel-space centre of the box.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self) -> [f64; 3] {
        let min = self.min();
        let max = self.max();
        [
            (min.x + max.x) as f64 / 2.0,
            (min.y + max.y) as f64 / 2.0,
            (min.z + max.z) as f64 / 2.0,
        ]
    }

    /// Grows the box so that it contains `coord`.
    pub fn expand(&mut self, coord: VoxelCoord) {
        let min = self.min().min(&coord);
        let max = self.max().max(&coord);
        self.start = min;
        self.end = max;
    }
}

/// Host-supplied conversion from world space to voxel space.
pub trait VoxelMapping {
    /// Maps a world-space position to the voxel containing it.
    ///
    /// The result may lie outside the grid; callers clamp.
    fn world_to_voxel(&self, world: [f32; 3]) -> VoxelCoord;
}

impl<F> VoxelMapping for F
where
    F: Fn([f32; 3]) -> VoxelCoord,
{
    fn world_to_voxel(&self, world: [f32; 3]) -> VoxelCoord {
        self(world)
    }
}

/// Selection gesture events, as delivered by the host's input loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionEvent {
    /// Pointer pressed at a world position.
    Begin([f32; 3]),
    /// Pointer moved while pressed.
    Move([f32; 3]),
    /// Pointer released.
    End,
    /// Gesture abandoned.
    Cancel,
}

/// Selector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    /// No gesture in progress.
    #[default]
    Idle,
    /// Gesture in progress between two voxel corners.
    Selecting {
        /// Corner picked when the gesture began.
        start: VoxelCoord,
        /// Most recent corner.
        current: VoxelCoord,
    },
}

/// Two-point region selection state machine (`Idle -> Selecting -> Idle`).
#[derive(Debug)]
pub struct RegionSelector<M> {
    mapping: M,
    dims: Dims,
    state: SelectionState,
}

impl<M: VoxelMapping> RegionSelector<M> {
    /// Creates an idle selector over a grid of `dims`.
    pub fn new(mapping: M, dims: Dims) -> Self {
        Self {
            mapping,
            dims,
            state: SelectionState::Idle,
        }
    }

    /// Grid the selector clamps into.
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Replaces the grid (e.g. after a crop) and abandons any open gesture.
    pub fn set_dims(&mut self, dims: Dims) {
        self.dims = dims;
        self.state = SelectionState::Idle;
    }

    /// Current state.
    pub fn state(&self) -> SelectionState {
        self.state
    }

    /// True while a gesture is open.
    pub fn is_selecting(&self) -> bool {
        matches!(self.state, SelectionState::Selecting { .. })
    }

    /// Starts a gesture, replacing any open one.
    pub fn begin_selection(&mut self, world: [f32; 3]) -> RegionBox {
        let voxel = self.mapping.world_to_voxel(world);
        self.state = SelectionState::Selecting {
            start: voxel,
            current: voxel,
        };
        RegionBox::single(voxel).normalized(self.dims)
    }

    /// Moves the second corner and returns the normalised region.
    ///
    /// # Errors
    /// Returns [`Error::NoActiveSelection`] when idle.
    pub fn update_selection(&mut self, world: [f32; 3]) -> Result<RegionBox> {
        let SelectionState::Selecting { start, .. } = self.state else {
            return Err(Error::NoActiveSelection);
        };
        let current = self.mapping.world_to_voxel(world);
        self.state = SelectionState::Selecting { start, current };
        Ok(RegionBox::new(start, current).normalized(self.dims))
    }

    /// The normalised region of the open gesture, if any.
    pub fn current(&self) -> Option<RegionBox> {
        match self.state {
            SelectionState::Idle => None,
            SelectionState::Selecting { start, current } => {
                Some(RegionBox::new(start, current).normalized(self.dims))
            }
        }
    }

    /// Finishes the gesture and returns the final region.
    ///
    /// # Errors
    /// Returns [`Error::NoActiveSelection`] when idle.
    pub fn end_selection(&mut self) -> Result<RegionBox> {
        let region = self.current().ok_or(Error::NoActiveSelection)?;
        self.state = SelectionState::Idle;
        Ok(region)
    }

    /// Abandons the open gesture, if any.
    pub fn cancel(&mut self) {
        self.state = SelectionState::Idle;
    }

    /// Feeds one input event through the state machine.
    ///
    /// Returns the region produced by the event: the live region for
    /// `Begin`/`Move`, the final region for `End`, nothing for `Cancel`.
    ///
    /// # Errors
    /// `Move` and `End` fail with [`Error::NoActiveSelection`] when idle.
    pub fn on_event(&mut self, event: SelectionEvent) -> Result<Option<RegionBox>> {
        match event {
            SelectionEvent::Begin(world) => Ok(Some(self.begin_selection(world))),
            SelectionEvent::Move(world) => self.update_selection(world).map(Some),
            SelectionEvent::End => self.end_selection().map(Some),
            SelectionEvent::Cancel => {
                self.cancel();
                Ok(None)
            }
        }
    }
}

/// A named bounding box marking something of interest in the cube.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// Display name, unique within a [`FeatureSet`].
    pub name: String,
    /// Normalised voxel bounds.
    pub bounds: RegionBox,
    /// Mask source the box was derived from, if any.
    pub source_id: Option<i16>,
    /// Whether the host should draw the box.
    pub visible: bool,
}

impl Feature {
    /// Creates a feature from a selected region.
    pub fn from_selection(name: impl Into<String>, region: RegionBox, dims: Dims) -> Self {
        Self {
            name: name.into(),
            bounds: region.normalized(dims),
            source_id: None,
            visible: true,
        }
    }

    /// Creates a feature bounding a mask source.
    pub fn from_source(name: impl Into<String>, source_id: i16, bounds: RegionBox) -> Self {
        Self {
            name: name.into(),
            bounds,
            source_id: Some(source_id),
            visible: true,
        }
    }
}

/// Ordered collection of features with unique names.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a feature, replacing (and returning) one with the same name.
    pub fn insert(&mut self, feature: Feature) -> Option<Feature> {
        match self.features.iter_mut().find(|f| f.name == feature.name) {
            Some(existing) => Some(std::mem::replace(existing, feature)),
            None => {
                self.features.push(feature);
                None
            }
        }
    }

    /// Removes a feature by name.
    pub fn remove(&mut self, name: &str) -> Option<Feature> {
        let pos = self.features.iter().position(|f| f.name == name)?;
        Some(self.features.remove(pos))
    }

    /// Looks a feature up by name.
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Features containing `coord`.
    pub fn at(&self, coord: VoxelCoord) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(move |f| f.bounds.contains(coord))
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Iterates features in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn unit_mapping(world: [f32; 3]) -> VoxelCoord {
        VoxelCoord::new(
            world[0].floor() as i64,
            world[1].floor() as i64,
            world[2].floor() as i64,
        )
    }

    #[test]
    fn test_normalize_orders_and_clamps() {
        let dims = Dims::new(10, 10, 10);
        let region = RegionBox::new(VoxelCoord::new(8, -2, 3), VoxelCoord::new(2, 4, 15));
        let n = region.normalized(dims);
        assert_eq!(n.start, VoxelCoord::new(2, 0, 3));
        assert_eq!(n.end, VoxelCoord::new(8, 4, 9));
        assert_eq!(n.extent(), Dims::new(7, 5, 7));
    }

    #[test]
    fn test_degenerate_region_is_single_voxel() {
        let dims = Dims::new(10, 10, 10);
        let region = RegionBox::single(VoxelCoord::new(2, 2, 2)).normalized(dims);
        assert_eq!(region.extent(), Dims::new(1, 1, 1));
        assert_eq!(region.voxel_count(), 1);
    }

    #[test]
    fn test_selector_flow() {
        let mut selector = RegionSelector::new(unit_mapping, Dims::new(8, 8, 8));
        assert!(selector.update_selection([1.0, 1.0, 1.0]).is_err());

        selector.begin_selection([5.5, 1.2, 0.0]);
        let live = selector.update_selection([2.1, 6.9, 20.0]).unwrap();
        assert_eq!(live.start, VoxelCoord::new(2, 1, 0));
        assert_eq!(live.end, VoxelCoord::new(5, 6, 7));

        let done = selector.end_selection().unwrap();
        assert_eq!(done, live);
        assert!(!selector.is_selecting());
        assert_eq!(selector.end_selection(), Err(Error::NoActiveSelection));
    }

    #[test]
    fn test_selector_events() {
        let mut selector = RegionSelector::new(unit_mapping, Dims::new(4, 4, 4));
        assert!(selector
            .on_event(SelectionEvent::Begin([0.0, 0.0, 0.0]))
            .unwrap()
            .is_some());
        selector
            .on_event(SelectionEvent::Move([3.0, 3.0, 3.0]))
            .unwrap();
        assert_eq!(selector.on_event(SelectionEvent::Cancel).unwrap(), None);
        assert_eq!(
            selector.on_event(SelectionEvent::End),
            Err(Error::NoActiveSelection)
        );
    }

    #[test]
    fn test_expand() {
        let mut region = RegionBox::single(VoxelCoord::new(3, 3, 3));
        region.expand(VoxelCoord::new(1, 5, 3));
        assert_eq!(region.min(), VoxelCoord::new(1, 3, 3));
        assert_eq!(region.max(), VoxelCoord::new(3, 5, 3));
        assert!(region.contains(VoxelCoord::new(2, 4, 3)));
        assert!(!region.contains(VoxelCoord::new(2, 4, 4)));
        assert_eq!(region.center(), [2.0, 4.0, 3.0]);
    }

    #[test]
    fn test_feature_set_replaces_by_name() {
        let dims = Dims::new(10, 10, 10);
        let mut set = FeatureSet::new();
        let a = Feature::from_selection("a", RegionBox::single(VoxelCoord::new(1, 1, 1)), dims);
        let b = Feature::from_selection(
            "a",
            RegionBox::new(VoxelCoord::new(0, 0, 0), VoxelCoord::new(2, 2, 2)),
            dims,
        );
        assert!(set.insert(a.clone()).is_none());
        assert_eq!(set.insert(b), Some(a));
        assert_eq!(set.len(), 1);
        assert_eq!(set.at(VoxelCoord::new(2, 2, 2)).count(), 1);
        assert!(set.remove("a").is_some());
        assert!(set.is_empty());
    }
}
