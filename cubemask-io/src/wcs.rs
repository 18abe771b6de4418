//! Linear world coordinates from FITS header keywords.

use crate::header::FitsHeader;
use cubemask_core::{Axis, WorldTransform};

/// Linear mapping of one axis: `world = crval + (pixel - crpix) * cdelt`,
/// with `pixel` 1-based as in FITS.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearAxis {
    /// Reference value.
    pub crval: f64,
    /// Reference pixel (1-based).
    pub crpix: f64,
    /// Increment per pixel.
    pub cdelt: f64,
    /// Axis type, e.g. `FREQ`.
    pub ctype: String,
    /// Unit label.
    pub cunit: String,
}

impl Default for LinearAxis {
    fn default() -> Self {
        Self {
            crval: 0.0,
            crpix: 1.0,
            cdelt: 1.0,
            ctype: String::new(),
            cunit: String::new(),
        }
    }
}

impl LinearAxis {
    fn from_header(header: &FitsHeader, n: usize) -> Self {
        let defaults = Self::default();
        let cdelt = header
            .float_value(&format!("CDELT{n}"))
            .or_else(|| header.float_value(&format!("CD{n}_{n}")))
            .unwrap_or(defaults.cdelt);
        let cdelt = if cdelt == 0.0 {
            log::warn!("CDELT{n} is zero, using unit increment");
            1.0
        } else {
            cdelt
        };
        Self {
            crval: header
                .float_value(&format!("CRVAL{n}"))
                .unwrap_or(defaults.crval),
            crpix: header
                .float_value(&format!("CRPIX{n}"))
                .unwrap_or(defaults.crpix),
            cdelt,
            ctype: header.string_value(&format!("CTYPE{n}")).unwrap_or_default(),
            cunit: header.string_value(&format!("CUNIT{n}")).unwrap_or_default(),
        }
    }

    #[inline]
    fn to_world(&self, voxel: f64) -> f64 {
        self.crval + (voxel + 1.0 - self.crpix) * self.cdelt
    }

    #[inline]
    fn to_voxel(&self, world: f64) -> f64 {
        (world - self.crval) / self.cdelt + self.crpix - 1.0
    }
}

/// Per-axis linear transform ignoring rotation and projection.
///
/// Suitable for spectral axes and small fields; anything more needs a full
/// WCS library behind [`WorldTransform`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearWcs {
    axes: [LinearAxis; 3],
}

impl LinearWcs {
    /// Voxel index equals world coordinate on every axis.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Reads `CRVALn`, `CRPIXn`, `CDELTn` (or `CDn_n`), `CTYPEn` and `CUNITn`
    /// for the first three axes; missing cards take identity defaults.
    #[must_use]
    pub fn from_header(header: &FitsHeader) -> Self {
        Self {
            axes: [
                LinearAxis::from_header(header, 1),
                LinearAxis::from_header(header, 2),
                LinearAxis::from_header(header, 3),
            ],
        }
    }

    /// Parameters of one axis.
    #[must_use]
    pub fn axis(&self, axis: Axis) -> &LinearAxis {
        &self.axes[axis.index()]
    }
}

impl WorldTransform for LinearWcs {
    fn voxel_to_world(&self, voxel: [f64; 3]) -> [f64; 3] {
        [
            self.axes[0].to_world(voxel[0]),
            self.axes[1].to_world(voxel[1]),
            self.axes[2].to_world(voxel[2]),
        ]
    }

    fn world_to_voxel(&self, world: [f64; 3]) -> [f64; 3] {
        [
            self.axes[0].to_voxel(world[0]),
            self.axes[1].to_voxel(world[1]),
            self.axes[2].to_voxel(world[2]),
        ]
    }

    fn unit(&self, axis: Axis) -> &str {
        &self.axes[axis.index()].cunit
    }
}
