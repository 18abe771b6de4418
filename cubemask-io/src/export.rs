//! Derived products: moment maps, cropped cubes and spectral profiles.
#![allow(clippy::cast_precision_loss)]

use crate::header::FitsHeader;
use crate::writer::{write_image, ImageData};
use crate::Result;
use cubemask_algorithms::{Moment, MomentMaps};
use cubemask_core::{Axis, VoxelCube, WorldTransform};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes one moment map as a 2D float image.
///
/// `header` is the source cube's header; its axis cards are renumbered for
/// the projection.
///
/// # Errors
/// Errors of the atomic writer.
pub fn write_moment_map_fits(
    path: &Path,
    header: &FitsHeader,
    maps: &MomentMaps,
    moment: Moment,
) -> Result<()> {
    let mut header = header.clone();
    header.project(maps.axis, maps.width, maps.height);
    if moment == Moment::One {
        header.set_string("BUNIT", "pixel");
    }
    write_image(path, &header, ImageData::F32(maps.map(moment)))?;
    log::info!("wrote moment map to {}", path.display());
    Ok(())
}

/// Writes a cube as a 3D float image.
///
/// `header` must already describe the cube's grid (see
/// [`FitsHeader::subcube`] for cropped products).
///
/// # Errors
/// `DimensionMismatch` if the header grid differs from the cube, plus the
/// errors of the atomic writer.
pub fn write_cube_fits(path: &Path, header: &FitsHeader, cube: &VoxelCube) -> Result<()> {
    let dims = header.dims()?;
    if dims != cube.dims() {
        return Err(cubemask_core::Error::DimensionMismatch {
            expected: dims,
            actual: cube.dims(),
        }
        .into());
    }
    write_image(path, header, ImageData::F32(cube.data()))?;
    log::info!("wrote cube to {}", path.display());
    Ok(())
}

/// Writes a spectral profile as CSV.
///
/// The first row is `<spectral unit>,<pixel unit>`; each following row holds
/// the world coordinate of a Z plane and the profile value. Spectral
/// coordinates are evaluated at `reference`, the `(x, y)` voxel the profile
/// belongs to: the sampled pixel, or the centre of a source's bounding box.
/// Pass a `CroppedTransform` for profiles of a cropped cube so the crop
/// origin is added back before `transform` is consulted. A transform without
/// a spectral unit labels the column `channel`.
///
/// # Errors
/// Returns [`crate::Error::Io`] if the file cannot be written.
pub fn write_profile_csv<T: WorldTransform + ?Sized>(
    path: &Path,
    profile: &[f64],
    transform: &T,
    reference: [f64; 2],
    pixel_unit: &str,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let spectral_unit = match transform.unit(Axis::Z) {
        "" => "channel",
        unit => unit,
    };
    writeln!(writer, "{spectral_unit},{pixel_unit}")?;
    for (z, value) in profile.iter().enumerate() {
        let world = transform.voxel_to_world([reference[0], reference[1], z as f64]);
        writeln!(writer, "{},{}", world[2], value)?;
    }
    writer.flush()?;
    log::info!("wrote {} profile rows to {}", profile.len(), path.display());
    Ok(())
}
