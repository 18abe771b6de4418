//! cubemask-algorithms: Operations over a cube/mask pair.
//!
//! - **Crop/downsample** - nearest-neighbour extraction of a sub-region
//! - **Brush** - sphere painting with stroke-level undo/redo
//! - **Moments** - moment-0/1 projections along one axis
//! - **Sources** - per-label statistics and spectral profiles
//!
#![warn(missing_docs)]

mod brush;
mod crop;
mod moments;
mod sources;

pub use brush::{BrushEditor, BrushEvent, BrushState, BrushStroke, DEFAULT_UNDO_DEPTH};
pub use crop::{crop_and_downsample, paste_mask, CropResult, DownsampleFactor};
pub use moments::{calculate_moments, Moment, MomentMaps, ScaleMode};
pub use sources::{source_bounds, source_statistics, spectral_profile, ProfileMode, SourceStats};
