//! cubemask command-line interface.
//!
//! Inspects FITS data cubes, edits source masks and exports derived products.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};

use cubemask_algorithms::{
    calculate_moments, crop_and_downsample, source_bounds, source_statistics, spectral_profile,
    BrushEditor, DownsampleFactor, Moment, MomentMaps, ProfileMode, ScaleMode,
};
use cubemask_core::{Axis, MaskVolume, RegionBox, VoxelCoord};
use cubemask_io::{
    write_cube_fits, write_mask_fits, write_moment_map_fits, write_profile_csv, CubeLoader,
    EditorConfig, FitsCubeLoader, LinearWcs, LoadedCube, MaskStore, SaveMode,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cube file error: {0}")]
    CubemaskIo(#[from] cubemask_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] cubemask_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Projection axis.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AxisArg {
    X,
    Y,
    Z,
}

impl From<AxisArg> for Axis {
    fn from(arg: AxisArg) -> Self {
        match arg {
            AxisArg::X => Axis::X,
            AxisArg::Y => Axis::Y,
            AxisArg::Z => Axis::Z,
        }
    }
}

/// Display scaling of moment maps.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScaleArg {
    /// Finite minimum to maximum
    MinMax,
    /// zscale around the median
    Zscale,
}

impl From<ScaleArg> for ScaleMode {
    fn from(arg: ScaleArg) -> Self {
        match arg {
            ScaleArg::MinMax => ScaleMode::MinMax,
            ScaleArg::Zscale => ScaleMode::ZScale,
        }
    }
}

/// Region a source spectrum is summed over.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// Whole XY bounding box of the source
    Box,
    /// Only voxels labelled with the source
    Masked,
}

impl From<ProfileArg> for ProfileMode {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Box => ProfileMode::BoundingBox,
            ProfileArg::Masked => ProfileMode::MaskedOnly,
        }
    }
}

/// Volumetric data cube and source-mask editor.
#[derive(Parser)]
#[command(name = "cubemask")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show dimensions, statistics and histogram of a cube
    Info {
        /// Input FITS cube
        input: PathBuf,

        /// Mask to summarise alongside the cube
        #[arg(long)]
        mask: Option<PathBuf>,

        /// Print every histogram bin
        #[arg(long)]
        histogram: bool,
    },

    /// Per-source statistics from a mask
    Sources {
        /// Input FITS cube
        input: PathBuf,

        /// Mask FITS file
        #[arg(short, long)]
        mask: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Attach spectral profiles
        #[arg(long, value_enum)]
        profiles: Option<ProfileArg>,
    },

    /// Write a spectrum (Z profile) as CSV
    #[command(group(ArgGroup::new("target").required(true).args(["pixel", "source"])))]
    Profile {
        /// Input FITS cube
        input: PathBuf,

        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Spectrum through one pixel, as X,Y
        #[arg(long, value_parser = parse_pixel)]
        pixel: Option<(usize, usize)>,

        /// Spectrum of a labelled source (needs --mask)
        #[arg(long)]
        source: Option<i16>,

        /// Mask FITS file
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Region summed for source spectra
        #[arg(long, value_enum, default_value = "box")]
        mode: ProfileArg,
    },

    /// Crop and downsample a cube (and mask)
    Crop {
        /// Input FITS cube
        input: PathBuf,

        /// Output FITS cube
        #[arg(short, long)]
        output: PathBuf,

        /// Mask to crop along with the cube
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Output file for the cropped mask
        #[arg(long, requires = "mask")]
        mask_output: Option<PathBuf>,

        /// First corner as X,Y,Z (default: origin)
        #[arg(long, value_parser = parse_coord)]
        from: Option<VoxelCoord>,

        /// Second corner as X,Y,Z (default: far corner)
        #[arg(long, value_parser = parse_coord)]
        to: Option<VoxelCoord>,

        /// Stride as N or X,Y,Z
        #[arg(long, value_parser = parse_factor, conflicts_with = "auto")]
        factor: Option<DownsampleFactor>,

        /// Choose the stride from the configured voxel budget
        #[arg(long)]
        auto: bool,
    },

    /// Compute moment-0 and moment-1 maps
    Moments {
        /// Input FITS cube
        input: PathBuf,

        /// Output prefix; writes <prefix>_mom0.fits and <prefix>_mom1.fits
        #[arg(short, long)]
        output: PathBuf,

        /// Mask FITS file
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Axis to collapse
        #[arg(long, value_enum, default_value = "z")]
        axis: AxisArg,

        /// Inclusion threshold without a mask
        #[arg(long)]
        threshold: Option<f32>,

        /// Include only masked voxels
        #[arg(long)]
        use_mask: bool,

        /// Display scaling to report
        #[arg(long, value_enum)]
        scale: Option<ScaleArg>,
    },

    /// Paint brush strokes into a mask and save it
    Paint {
        /// Input FITS cube
        input: PathBuf,

        /// Existing mask to edit (default: a new, empty mask)
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Stroke centre as X,Y,Z; repeat for several strokes
        #[arg(long = "at", value_parser = parse_coord, required = true)]
        strokes: Vec<VoxelCoord>,

        /// Brush radius in voxels
        #[arg(short, long)]
        radius: Option<u32>,

        /// Source id to paint (default: a new id)
        #[arg(short, long)]
        source: Option<i16>,

        /// Erase the source instead of painting it
        #[arg(long)]
        erase: bool,

        /// Undo the last stroke before saving
        #[arg(long)]
        undo_last: bool,

        /// Overwrite the mask file instead of writing a new one
        #[arg(long)]
        overwrite: bool,
    },
}

fn parse_coord(s: &str) -> std::result::Result<VoxelCoord, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected X,Y,Z, got {s:?}"));
    }
    let mut values = [0i64; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("invalid coordinate {part:?}"))?;
    }
    Ok(VoxelCoord::from(values))
}

fn parse_pixel(s: &str) -> std::result::Result<(usize, usize), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid pixel index {v:?}"))
    };
    Ok((parse(x)?, parse(y)?))
}

fn parse_factor(s: &str) -> std::result::Result<DownsampleFactor, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| format!("invalid factor {s:?}"))?;
    let factor = match parts.as_slice() {
        [f] => DownsampleFactor::uniform(*f),
        [x, y, z] => DownsampleFactor::new(*x, *y, *z),
        _ => return Err(format!("expected N or X,Y,Z, got {s:?}")),
    };
    factor.validate().map_err(|e| e.to_string())?;
    Ok(factor)
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_cube(config: &EditorConfig, path: &Path) -> Result<LoadedCube> {
    let loader = FitsCubeLoader::new().with_histogram_bins(config.volume.histogram_bins);
    Ok(loader.load_cube(path)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EditorConfig::from_file(path)?,
        None => EditorConfig::default(),
    };
    let start = Instant::now();

    match cli.command {
        Commands::Info {
            input,
            mask,
            histogram,
        } => {
            let loaded = load_cube(&config, &input)?;
            let cube = &loaded.cube;
            let stats = cube.statistics();
            println!("File: {}", input.display());
            if let Some(object) = loaded.header.string_value("OBJECT") {
                println!("Object: {}", object);
            }
            println!("Dimensions: {} ({} voxels)", cube.dims(), cube.dims().len());
            println!("Blank voxels: {}", stats.nan_count);
            if stats.all_nan {
                println!("All voxels are blank");
            } else {
                println!("Range: {} - {}", stats.min, stats.max);
                println!("Mean: {:.6}  Std dev: {:.6}", stats.mean, stats.std_dev);
            }
            let hist = cube.histogram();
            println!(
                "Histogram: {} bins of width {:.6} over [{}, {}]",
                hist.bins.len(),
                hist.bin_width,
                hist.min,
                hist.max
            );
            if histogram {
                for (i, count) in hist.bins.iter().enumerate() {
                    println!("{:>14.6} {}", hist.bin_start(i), count);
                }
            }
            if let Some(mask_path) = mask {
                let mask = FitsCubeLoader::new().load_mask(&mask_path, cube.dims())?;
                let ids = mask.source_ids();
                println!("Mask: {} ({} sources)", mask_path.display(), ids.len());
                for id in ids {
                    println!("  source {:>5}: {} voxels", id, mask.voxel_count(id));
                }
            }
        }

        Commands::Sources {
            input,
            mask,
            json,
            profiles,
        } => {
            let loaded = load_cube(&config, &input)?;
            let mask = FitsCubeLoader::new().load_mask(&mask, loaded.cube.dims())?;
            let mut stats = source_statistics(&loaded.cube, &mask)?;
            if let Some(mode) = profiles {
                for source in &mut stats {
                    source.attach_profile(&loaded.cube, &mask, mode.into())?;
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{:>6} {:>10} {:>14} {:>14} {:>14}  bounds",
                    "id", "voxels", "sum", "mean", "max"
                );
                for s in &stats {
                    println!(
                        "{:>6} {:>10} {:>14.6} {:>14.6} {:>14.6}  {} - {}",
                        s.id,
                        s.voxel_count,
                        s.sum,
                        s.mean,
                        s.max,
                        s.bounds.min(),
                        s.bounds.max()
                    );
                }
            }
        }

        Commands::Profile {
            input,
            output,
            pixel,
            source,
            mask,
            mode,
        } => {
            let loaded = load_cube(&config, &input)?;
            let cube = &loaded.cube;
            let (profile, reference): (Vec<f64>, [f64; 2]) = match (pixel, source) {
                (Some((x, y)), _) => (
                    cube.profile(Axis::Z, x, y)?
                        .into_iter()
                        .map(f64::from)
                        .collect(),
                    [x as f64, y as f64],
                ),
                (None, Some(id)) => {
                    let path = mask.ok_or_else(|| {
                        CliError::Usage("--source needs a mask (--mask)".into())
                    })?;
                    let mask = FitsCubeLoader::new().load_mask(&path, cube.dims())?;
                    let profile = spectral_profile(cube, &mask, id, mode.into())?;
                    // spectral_profile has already rejected unknown ids
                    let [cx, cy, _] = source_bounds(&mask, id)
                        .map_or([0.0; 3], |bounds| bounds.center());
                    (profile, [cx, cy])
                }
                (None, None) => {
                    return Err(CliError::Usage("give --pixel or --source".into()));
                }
            };
            let wcs = LinearWcs::from_header(&loaded.header);
            let unit = loaded.header.string_value("BUNIT").unwrap_or_default();
            write_profile_csv(&output, &profile, &wcs, reference, &unit)?;
            println!("Wrote {} channels to {}", profile.len(), output.display());
        }

        Commands::Crop {
            input,
            output,
            mask,
            mask_output,
            from,
            to,
            factor,
            auto,
        } => {
            let loaded = load_cube(&config, &input)?;
            let dims = loaded.cube.dims();
            let region = RegionBox::new(
                from.unwrap_or_default(),
                to.unwrap_or_else(|| dims.max_coord()),
            );
            let factor = if auto {
                DownsampleFactor::fit_within(
                    region.normalized(dims).extent(),
                    config.volume.max_voxels,
                )
            } else {
                factor.unwrap_or_default()
            };
            let mask = match &mask {
                Some(path) => FitsCubeLoader::new().load_mask(path, dims)?,
                None => MaskVolume::allocate(dims)?,
            };

            let result = crop_and_downsample(&loaded.cube, &mask, &region, factor)?;
            let mut header = loaded.header.clone();
            header.subcube(result.origin, result.factor.as_array(), result.cube.dims());
            write_cube_fits(&output, &header, &result.cube)?;
            println!(
                "Cropped {} at {} with stride {:?} to {}",
                dims,
                result.origin,
                result.factor.as_array(),
                result.cube.dims()
            );
            println!("Wrote cube to {}", output.display());
            if let Some(path) = mask_output {
                write_mask_fits(&path, &header, &result.mask)?;
                println!("Wrote mask to {}", path.display());
            }
        }

        Commands::Moments {
            input,
            output,
            mask,
            axis,
            threshold,
            use_mask,
            scale,
        } => {
            let loaded = load_cube(&config, &input)?;
            let mask = match &mask {
                Some(path) => Some(FitsCubeLoader::new().load_mask(path, loaded.cube.dims())?),
                None => None,
            };
            let threshold = threshold.unwrap_or(config.moments.threshold);
            let use_mask = use_mask || config.moments.use_mask;
            let scale = scale.map_or(config.moments.scale, ScaleMode::from);

            let maps = calculate_moments(
                &loaded.cube,
                mask.as_ref(),
                axis.into(),
                threshold,
                use_mask,
            )?;
            for (moment, suffix) in [(Moment::Zero, "_mom0.fits"), (Moment::One, "_mom1.fits")] {
                let path = with_suffix(&output, suffix);
                write_moment_map_fits(&path, &loaded.header, &maps, moment)?;
                match MomentMaps::display_range(maps.map(moment), scale) {
                    Some((lo, hi)) => println!(
                        "Wrote {} ({}x{}, display {} - {})",
                        path.display(),
                        maps.width,
                        maps.height,
                        lo,
                        hi
                    ),
                    None => println!("Wrote {} (no finite pixels)", path.display()),
                }
            }
        }

        Commands::Paint {
            input,
            mask,
            strokes,
            radius,
            source,
            erase,
            undo_last,
            overwrite,
        } => {
            let loaded = load_cube(&config, &input)?;
            let dims = loaded.cube.dims();
            let mut store =
                MaskStore::new(&input, loaded.header).with_suffix(config.mask.suffix.clone());
            let mask = match &mask {
                Some(path) => store.load(path)?,
                None => MaskVolume::allocate(dims)?,
            };

            let mut editor = BrushEditor::with_undo_depth(mask, config.brush.undo_depth);
            match source {
                Some(id) => editor.set_active_source(id)?,
                None if erase => {
                    return Err(CliError::Usage("--erase needs --source".into()));
                }
                None => {
                    editor.new_source();
                }
            }
            let radius = radius.unwrap_or(config.brush.default_radius);
            for center in strokes {
                editor.begin_stroke()?;
                editor.paint_active(center, radius, !erase)?;
                let changed = editor.end_stroke()?;
                println!(
                    "Stroke at {}: {} voxels {}",
                    center,
                    changed,
                    if erase { "erased" } else { "painted" }
                );
            }
            if undo_last && editor.undo()? {
                println!("Undid last stroke");
            }

            let source = editor.active_source();
            let mut mask = editor.into_mask();
            if !mask.is_changed() {
                println!("Mask unchanged, nothing to save");
            } else {
                let mode = if overwrite {
                    SaveMode::Overwrite
                } else {
                    SaveMode::NewFile
                };
                let path = store.save(&mut mask, mode)?;
                println!(
                    "Saved mask to {} (source {} has {} voxels)",
                    path.display(),
                    source,
                    mask.voxel_count(source)
                );
            }
        }
    }

    log::debug!("finished in {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}
