//! cubemask-io: FITS I/O, mask persistence and exports for cubemask.
//!
//! This crate reads primary-HDU FITS cubes and masks through cfitsio, saves
//! edited masks atomically with the cube's header, writes moment maps,
//! cropped cubes and spectral profiles, and loads the editor configuration.

mod config;
mod error;
mod export;
pub mod header;
mod mask_store;
mod reader;
mod wcs;
mod writer;

pub use config::{
    BrushConfig, EditorConfig, MaskConfig, MomentConfig, VolumeConfig, DEFAULT_MAX_VOXELS,
};
pub use error::{Error, Result};
pub use export::{write_cube_fits, write_moment_map_fits, write_profile_csv};
pub use header::{Card, FitsHeader, ENCODING_KEYS};
pub use mask_store::{write_mask_fits, MaskStore, SaveMode};
pub use reader::{CubeLoader, FitsCubeLoader, FitsCubeReader, LoadedCube};
pub use wcs::{LinearAxis, LinearWcs};
pub use writer::{write_image, ImageData};
