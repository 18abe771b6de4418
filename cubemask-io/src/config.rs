//! Editor configuration loaded from JSON.
//!
//! Every section and field is optional; missing values take the defaults
//! below.
//!
//! ```json
//! {
//!   "volume":  { "histogram_bins": 256, "max_voxels": 134217728 },
//!   "brush":   { "undo_depth": 100, "default_radius": 1 },
//!   "moments": { "threshold": 0.0, "use_mask": false, "scale": "min_max" },
//!   "mask":    { "suffix": "_mask" }
//! }
//! ```

use crate::{Error, Result};
use cubemask_algorithms::{ScaleMode, DEFAULT_UNDO_DEPTH};
use cubemask_core::DEFAULT_HISTOGRAM_BINS;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Default voxel budget for automatic downsampling (512³).
pub const DEFAULT_MAX_VOXELS: usize = 512 * 512 * 512;

/// Cube loading settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Histogram bins computed at load.
    pub histogram_bins: usize,
    /// Voxel budget used when choosing downsampling factors.
    pub max_voxels: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            max_voxels: DEFAULT_MAX_VOXELS,
        }
    }
}

/// Brush settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// Strokes kept for undo.
    pub undo_depth: usize,
    /// Radius used when none is given.
    pub default_radius: u32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            undo_depth: DEFAULT_UNDO_DEPTH,
            default_radius: 1,
        }
    }
}

/// Moment map settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MomentConfig {
    /// Inclusion threshold when no mask is used.
    pub threshold: f32,
    /// Restrict to masked voxels.
    pub use_mask: bool,
    /// Display scaling.
    pub scale: ScaleMode,
}

/// Mask file settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Suffix appended to the cube's file stem for new mask files.
    pub suffix: String,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            suffix: "_mask".to_string(),
        }
    }
}

/// Complete editor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EditorConfig {
    /// Cube loading.
    pub volume: VolumeConfig,
    /// Brush editing.
    pub brush: BrushConfig,
    /// Moment maps.
    pub moments: MomentConfig,
    /// Mask files.
    pub mask: MaskConfig,
}

impl EditorConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// [`Error::Io`] if the file cannot be read, [`Error::Json`] if it is not
    /// valid JSON and [`Error::Config`] if a value is out of range.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON string.
    ///
    /// # Errors
    /// As [`EditorConfig::from_file`], without the I/O case.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    ///
    /// This is called automatically when loading from JSON. For
    /// programmatically created configs, call this before use.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.volume.histogram_bins == 0 {
            return Err(Error::Config("volume.histogram_bins must be at least 1".into()));
        }
        if self.volume.max_voxels == 0 {
            return Err(Error::Config("volume.max_voxels must be at least 1".into()));
        }
        if self.brush.undo_depth == 0 {
            return Err(Error::Config("brush.undo_depth must be at least 1".into()));
        }
        if !self.moments.threshold.is_finite() {
            return Err(Error::Config("moments.threshold must be finite".into()));
        }
        if self.mask.suffix.is_empty()
            || self.mask.suffix.contains(std::path::is_separator)
        {
            return Err(Error::Config(format!(
                "mask.suffix {:?} must be a non-empty file name fragment",
                self.mask.suffix
            )));
        }
        Ok(())
    }
}
