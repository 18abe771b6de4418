//! Saving masks next to their data cube.
//!
//! A saved mask carries a verbatim copy of the cube's header cards, so
//! downstream tools see the same grid and WCS. Only the sample encoding
//! differs: `BITPIX` is 16 and the cube's `BSCALE`, `BZERO` and `BLANK` cards
//! are left out because the labels are stored unscaled.

use crate::header::FitsHeader;
use crate::reader::FitsCubeReader;
use crate::writer::{write_image, ImageData};
use crate::Result;
use cubemask_core::MaskVolume;
use std::path::{Path, PathBuf};

/// Where [`MaskStore::save`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Replace the mask file the mask was loaded from.
    Overwrite,
    /// Write a new file next to the cube.
    NewFile,
}

/// Writes a mask FITS file with `BITPIX = 16` and the cards of `header`,
/// minus the encoding cards.
///
/// # Errors
/// [`crate::Error::Core`] wrapping `DimensionMismatch` if the header grid
/// differs from the mask, plus the errors of the atomic writer.
pub fn write_mask_fits(path: &Path, header: &FitsHeader, mask: &MaskVolume) -> Result<()> {
    mask.ensure_dims(header.dims()?)?;
    let mut header = header.clone();
    header.strip_encoding();
    write_image(path, &header, ImageData::I16(mask.data()))
}

/// Tracks the files belonging to one cube's mask.
#[derive(Debug, Clone)]
pub struct MaskStore {
    cube_path: PathBuf,
    header: FitsHeader,
    mask_path: Option<PathBuf>,
    suffix: String,
}

impl MaskStore {
    /// Store for the cube at `cube_path` with its primary `header`.
    pub fn new<P: AsRef<Path>>(cube_path: P, header: FitsHeader) -> Self {
        Self {
            cube_path: cube_path.as_ref().to_path_buf(),
            header,
            mask_path: None,
            suffix: "_mask".to_string(),
        }
    }

    /// Sets the suffix used for new mask files.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Records the file an existing mask came from.
    #[must_use]
    pub fn with_mask_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.mask_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// The cube header masks are saved with.
    #[must_use]
    pub fn header(&self) -> &FitsHeader {
        &self.header
    }

    /// Mask file currently associated with the cube, if any.
    #[must_use]
    pub fn mask_path(&self) -> Option<&Path> {
        self.mask_path.as_deref()
    }

    /// Loads the mask at `path` and makes it the associated mask file.
    ///
    /// # Errors
    /// Read errors, or `DimensionMismatch` if it does not fit the cube.
    pub fn load(&mut self, path: &Path) -> Result<MaskVolume> {
        let mut reader = FitsCubeReader::open(path)?;
        let mask = reader.read_mask()?;
        mask.ensure_dims(self.header.dims()?)?;
        self.mask_path = Some(path.to_path_buf());
        Ok(mask)
    }

    /// First unused `<stem><suffix>.fits`, then `<stem><suffix>_1.fits`, ...
    /// next to the cube.
    #[must_use]
    pub fn next_mask_path(&self) -> PathBuf {
        let dir = self.cube_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = self
            .cube_path
            .file_stem()
            .map_or_else(|| "cube".into(), |s| s.to_string_lossy());
        let base = format!("{stem}{}", self.suffix);
        let mut candidate = dir.join(format!("{base}.fits"));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{base}_{n}.fits"));
            n += 1;
        }
        candidate
    }

    /// Saves `mask` and clears its changed flag; returns the path written.
    ///
    /// [`SaveMode::Overwrite`] without an associated mask file falls back to
    /// a new file. After a successful save the written file becomes the
    /// associated mask file.
    ///
    /// # Errors
    /// `DimensionMismatch` if the mask does not fit the cube, and
    /// [`crate::Error::Persistence`] if writing fails. On error the mask stays
    /// marked as changed and any existing file is untouched.
    pub fn save(&mut self, mask: &mut MaskVolume, mode: SaveMode) -> Result<PathBuf> {
        let target = match (mode, &self.mask_path) {
            (SaveMode::Overwrite, Some(path)) => path.clone(),
            (SaveMode::Overwrite, None) => {
                log::warn!("no mask file to overwrite, writing a new one");
                self.next_mask_path()
            }
            (SaveMode::NewFile, _) => self.next_mask_path(),
        };
        write_mask_fits(&target, &self.header, mask)?;
        mask.mark_saved();
        log::info!("saved mask to {}", target.display());
        self.mask_path = Some(target.clone());
        Ok(target)
    }
}
