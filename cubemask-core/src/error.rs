//! Error types for cubemask-core.

use crate::dims::{Dims, VoxelCoord};
use thiserror::Error;

/// Result type alias for cubemask operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for cube and mask operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A voxel index lies outside the grid.
    #[error("voxel {coord} is outside a {dims} grid")]
    OutOfBounds { coord: VoxelCoord, dims: Dims },

    /// A flat buffer does not hold `dimX * dimY * dimZ` values.
    #[error("buffer holds {actual} values but {dims} needs {expected}")]
    LengthMismatch {
        dims: Dims,
        expected: usize,
        actual: usize,
    },

    /// Two volumes that must share a grid do not.
    #[error("dimension mismatch: expected {expected}, found {actual}")]
    DimensionMismatch { expected: Dims, actual: Dims },

    /// A zero-sized (or overflowing) grid was requested.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Downsample factor below one.
    #[error("invalid downsample factor {factor} on the {axis} axis")]
    InvalidFactor { axis: char, factor: usize },

    /// Histogram request that cannot be binned.
    #[error("invalid histogram request: {0}")]
    InvalidHistogram(String),

    /// Source ids used for painting must be positive.
    #[error("invalid source id {0}: painting requires a positive id")]
    InvalidSourceId(i16),

    /// Source id absent from the mask.
    #[error("source {0} does not occur in the mask")]
    UnknownSource(i16),

    /// Mask-based aggregation requested without a mask.
    #[error("operation requires a mask but none was supplied")]
    MaskRequired,

    /// A brush stroke is open; finish it first.
    #[error("a brush stroke is in progress")]
    StrokeInProgress,

    /// No brush stroke is open.
    #[error("no brush stroke is in progress")]
    NoActiveStroke,

    /// No region selection is open.
    #[error("no region selection is in progress")]
    NoActiveSelection,
}
