//! FITS cube and mask readers.
//!
//! Only the primary HDU is read. cfitsio converts samples and applies
//! `BSCALE`/`BZERO` on the way out.

use crate::header::FitsHeader;
use crate::{Error, Result};
use cubemask_core::{Dims, MaskVolume, VoxelCube, DEFAULT_HISTOGRAM_BINS};
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::ImageType;
use fitsio::FitsFile;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// A primary-HDU FITS image holding a cube or a mask.
pub struct FitsCubeReader {
    fptr: FitsFile,
    hdu: FitsHdu,
    header: FitsHeader,
    dims: Dims,
    integer: bool,
    path: PathBuf,
}

impl FitsCubeReader {
    /// Opens `path` and validates its primary header.
    ///
    /// # Errors
    /// [`Error::Fits`] if cfitsio cannot open the file and
    /// [`Error::InvalidFormat`] if the primary HDU is not a supported 3D
    /// image.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut fptr = FitsFile::open(path)?;
        let header = FitsHeader::read_primary(&mut fptr)?;
        let hdu = fptr.primary_hdu()?;
        let integer = match &hdu.info {
            HduInfo::ImageInfo { image_type, .. } => {
                log::debug!("{}: primary image of {image_type:?}", path.display());
                !matches!(image_type, ImageType::Float | ImageType::Double)
            }
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "{}: primary HDU is not an image",
                    path.display()
                )))
            }
        };
        let dims = header.dims()?;
        log::debug!("opened {} ({dims})", path.display());
        Ok(Self {
            fptr,
            hdu,
            header,
            dims,
            integer,
            path: path.to_path_buf(),
        })
    }

    /// The primary header.
    #[must_use]
    pub fn header(&self) -> &FitsHeader {
        &self.header
    }

    /// Image dimensions.
    #[must_use]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// True if samples are stored as integers.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.integer
    }

    /// Path the reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len == self.dims.len() {
            Ok(())
        } else {
            Err(Error::InvalidFormat(format!(
                "{}: read {len} samples, header describes {}",
                self.path.display(),
                self.dims.len()
            )))
        }
    }

    /// Physical values as `f32`.
    ///
    /// # Errors
    /// [`Error::Fits`] if the data unit cannot be read.
    pub fn read_values(&mut self) -> Result<Vec<f32>> {
        let values: Vec<f32> = self.hdu.read_image(&mut self.fptr)?;
        self.check_len(values.len())?;
        Ok(values)
    }

    /// Reads the image as a cube with `bins` histogram bins.
    ///
    /// # Errors
    /// Read errors and cube construction errors.
    pub fn read_cube(&mut self, bins: usize) -> Result<VoxelCube> {
        let values = self.read_values()?;
        Ok(VoxelCube::with_histogram_bins(values, self.dims, bins)?)
    }

    /// Reads the image as a source mask.
    ///
    /// # Errors
    /// [`Error::InvalidFormat`] for floating-point images or values outside
    /// the `i16` range.
    pub fn read_mask(&mut self) -> Result<MaskVolume> {
        if !self.integer {
            return Err(Error::InvalidFormat(format!(
                "{}: mask must hold integers",
                self.path.display()
            )));
        }
        let raw: Vec<i32> = self.hdu.read_image(&mut self.fptr)?;
        self.check_len(raw.len())?;
        let labels: Option<Vec<i16>> = raw.par_iter().map(|&v| i16::try_from(v).ok()).collect();
        let labels = labels.ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{}: mask value outside the 16-bit range",
                self.path.display()
            ))
        })?;
        Ok(MaskVolume::from_vec(labels, self.dims)?)
    }
}

/// A loaded cube with the header it came from.
#[derive(Debug, Clone)]
pub struct LoadedCube {
    /// Voxel data.
    pub cube: VoxelCube,
    /// Primary header, kept for saving masks and exports.
    pub header: FitsHeader,
}

/// Source of cubes by path.
pub trait CubeLoader {
    /// Loads the cube stored at `path`.
    ///
    /// # Errors
    /// Implementation-specific read or format errors.
    fn load_cube(&self, path: &Path) -> Result<LoadedCube>;

    /// Loads a mask stored at `path` that must share the grid `dims`.
    ///
    /// # Errors
    /// Read or format errors, and [`Error::Core`] wrapping
    /// `DimensionMismatch` if the grids differ.
    fn load_mask(&self, path: &Path, dims: Dims) -> Result<MaskVolume>;
}

/// [`CubeLoader`] for primary-HDU FITS images.
#[derive(Debug, Clone, Copy)]
pub struct FitsCubeLoader {
    histogram_bins: usize,
}

impl Default for FitsCubeLoader {
    fn default() -> Self {
        Self {
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }
}

impl FitsCubeLoader {
    /// Loader with the default histogram bin count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the histogram bin count of loaded cubes.
    #[must_use]
    pub fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = bins;
        self
    }
}

impl CubeLoader for FitsCubeLoader {
    fn load_cube(&self, path: &Path) -> Result<LoadedCube> {
        let mut reader = FitsCubeReader::open(path)?;
        let cube = reader.read_cube(self.histogram_bins)?;
        log::info!("loaded cube {} ({})", path.display(), cube.dims());
        Ok(LoadedCube {
            cube,
            header: reader.header,
        })
    }

    fn load_mask(&self, path: &Path, dims: Dims) -> Result<MaskVolume> {
        let mask = FitsCubeReader::open(path)?.read_mask()?;
        mask.ensure_dims(dims)?;
        log::info!("loaded mask {}", path.display());
        Ok(mask)
    }
}
