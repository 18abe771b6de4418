//! Atomic FITS image writer.
//!
//! cfitsio writes the image into a temporary file in the target directory,
//! which is renamed over the target only once it is complete, so a failed
//! write never leaves a truncated file behind.

use crate::header::FitsHeader;
use crate::{Error, Result};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use std::path::Path;
use tempfile::NamedTempFile;

/// Pixel data of an image to be written.
#[derive(Debug, Clone, Copy)]
pub enum ImageData<'a> {
    /// 16-bit integers (`BITPIX = 16`).
    I16(&'a [i16]),
    /// 32-bit floats (`BITPIX = -32`).
    F32(&'a [f32]),
}

impl ImageData<'_> {
    /// `BITPIX` value for this sample type.
    #[must_use]
    pub fn bitpix(&self) -> i32 {
        match self {
            Self::I16(_) => 16,
            Self::F32(_) => -32,
        }
    }

    fn image_type(&self) -> ImageType {
        match self {
            Self::I16(_) => ImageType::Short,
            Self::F32(_) => ImageType::Float,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I16(d) => d.len(),
            Self::F32(d) => d.len(),
        }
    }

    /// True if there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_fits(path: &Path, header: &FitsHeader, data: ImageData<'_>) -> Result<()> {
    // cfitsio takes the slowest axis first
    let dimensions: Vec<usize> = header.axes().iter().rev().copied().collect();
    let description = ImageDescription {
        data_type: data.image_type(),
        dimensions: &dimensions,
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    header.write_cards(&mut fptr)?;
    let hdu = fptr.primary_hdu()?;
    match data {
        ImageData::I16(values) => {
            let wide: Vec<i32> = values.iter().map(|&v| i32::from(v)).collect();
            hdu.write_image(&mut fptr, &wide)?;
        }
        ImageData::F32(values) => hdu.write_image(&mut fptr, values)?,
    }
    Ok(())
}

/// Writes `data` with `header` to `path`, replacing it atomically.
///
/// `BITPIX` follows the sample type of `data` and the header's axis lengths
/// must describe it. The values are written as physical values, so the
/// header's `BSCALE`, `BZERO` and `BLANK` cards are dropped; every other card
/// is written verbatim.
///
/// # Errors
/// [`Error::InvalidFormat`] if the header disagrees with the data and
/// [`Error::Persistence`] if writing or renaming fails; an existing file at
/// `path` is untouched in both cases.
pub fn write_image(path: &Path, header: &FitsHeader, data: ImageData<'_>) -> Result<()> {
    if header.sample_count() != data.len() {
        return Err(Error::InvalidFormat(format!(
            "header describes {} samples, got {}",
            header.sample_count(),
            data.len()
        )));
    }
    let mut header = header.clone();
    header.strip_encoding();

    let persistence = |source: std::io::Error| Error::Persistence {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)
        .map_err(persistence)?
        .into_temp_path();
    write_fits(&tmp, &header, data).map_err(|err| match err {
        Error::Fits(fits) => persistence(std::io::Error::other(fits.to_string())),
        other => other,
    })?;
    tmp.persist(path).map_err(|e| persistence(e.error))?;
    log::debug!(
        "wrote {} (BITPIX {}, {} samples)",
        path.display(),
        data.bitpix(),
        data.len()
    );
    Ok(())
}
