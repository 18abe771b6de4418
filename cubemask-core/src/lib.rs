//! cubemask-core: Core types for volumetric cube and mask editing.
//!
//! This crate provides the voxel cube, the parallel source mask, region
//! selection, and the world-coordinate seam that the algorithms and I/O
//! crates build on.
//!

pub mod cube;
pub mod dims;
pub mod error;
pub mod mask;
pub mod region;
pub mod wcs;

pub use cube::{CubeStatistics, Histogram, VoxelCube, DEFAULT_HISTOGRAM_BINS};
pub use dims::{Axis, Dims, VoxelCoord};
pub use error::{Error, Result};
pub use mask::{MaskVolume, VoxelDelta, BACKGROUND, EXCLUDED};
pub use region::{
    Feature, FeatureSet, RegionBox, RegionSelector, SelectionEvent, SelectionState, VoxelMapping,
};
pub use wcs::{CroppedTransform, WorldTransform};
