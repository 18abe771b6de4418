use cubemask_algorithms::BrushEditor;
use cubemask_core::{Dims, MaskVolume, VoxelCoord};
use cubemask_io::{
    write_image, CubeLoader, Error, FitsCubeLoader, FitsCubeReader, FitsHeader, ImageData,
    MaskStore, SaveMode,
};
use fitsio::FitsFile;
use std::path::{Path, PathBuf};

fn cube_header(dims: Dims) -> FitsHeader {
    let mut header = FitsHeader::new(&[dims.x, dims.y, dims.z]);
    header.set_string("OBJECT", "test field");
    header.set_float("CRVAL3", 1.42e9);
    header.set_string("CUNIT3", "Hz");
    header
}

fn write_cube(dir: &Path, dims: Dims) -> PathBuf {
    let path = dir.join("field.fits");
    let values: Vec<f32> = (0..dims.len()).map(|i| (i % 5) as f32).collect();
    write_image(&path, &cube_header(dims), ImageData::F32(&values)).unwrap();
    path
}

fn painted_mask(dims: Dims) -> MaskVolume {
    let mut editor = BrushEditor::new(MaskVolume::allocate(dims).unwrap());
    editor.begin_stroke().unwrap();
    editor.paint_at(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
    editor.end_stroke().unwrap();
    editor.into_mask()
}

#[test]
fn test_new_file_save_copies_header() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dims::new(4, 4, 4);
    let cube_path = write_cube(dir.path(), dims);
    let loaded = FitsCubeLoader::new().load_cube(&cube_path).unwrap();
    assert_eq!(loaded.cube.dims(), dims);

    let mut store = MaskStore::new(&cube_path, loaded.header.clone());
    let mut mask = painted_mask(dims);
    assert!(mask.is_changed());
    let saved = store.save(&mut mask, SaveMode::NewFile).unwrap();
    assert_eq!(saved, dir.path().join("field_mask.fits"));
    assert!(!mask.is_changed());

    // same grid and cards, integer samples
    let written = FitsCubeReader::open(&saved).unwrap();
    assert!(written.is_integer());
    assert_eq!(written.header(), &loaded.header);
    assert_eq!(written.header().string_value("OBJECT").as_deref(), Some("test field"));

    let reloaded = FitsCubeLoader::new().load_mask(&saved, dims).unwrap();
    assert_eq!(reloaded.data(), mask.data());
    assert!(!reloaded.is_changed());
}

#[test]
fn test_new_file_names_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dims::new(3, 3, 3);
    let cube_path = write_cube(dir.path(), dims);
    let mut store = MaskStore::new(&cube_path, cube_header(dims));
    let mut mask = painted_mask(dims);

    let first = store.save(&mut mask, SaveMode::NewFile).unwrap();
    let second = store.save(&mut mask, SaveMode::NewFile).unwrap();
    let third = store.save(&mut mask, SaveMode::NewFile).unwrap();
    assert_eq!(first.file_name().unwrap(), "field_mask.fits");
    assert_eq!(second.file_name().unwrap(), "field_mask_1.fits");
    assert_eq!(third.file_name().unwrap(), "field_mask_2.fits");
    assert_eq!(store.mask_path(), Some(third.as_path()));
}

#[test]
fn test_overwrite_replaces_loaded_mask() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dims::new(4, 4, 4);
    let cube_path = write_cube(dir.path(), dims);
    let mut store = MaskStore::new(&cube_path, cube_header(dims)).with_suffix("_sources");
    let mut mask = painted_mask(dims);
    let path = store.save(&mut mask, SaveMode::NewFile).unwrap();
    assert!(path.ends_with("field_sources.fits"));

    let mut store = MaskStore::new(&cube_path, cube_header(dims));
    let mut mask = store.load(&path).unwrap();
    mask.set_voxel(3, 3, 3, 9).unwrap();
    let overwritten = store.save(&mut mask, SaveMode::Overwrite).unwrap();
    assert_eq!(overwritten, path);

    let reloaded = store.load(&path).unwrap();
    assert_eq!(reloaded.voxel(3, 3, 3).unwrap(), 9);
    assert_eq!(reloaded.voxel_count(5), 7);
}

#[test]
fn test_failed_save_leaves_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dims::new(4, 4, 4);
    let cube_path = write_cube(dir.path(), dims);
    let mut store = MaskStore::new(&cube_path, cube_header(dims));
    let mut mask = painted_mask(dims);
    let path = store.save(&mut mask, SaveMode::NewFile).unwrap();
    let before = std::fs::read(&path).unwrap();

    // a mask on another grid is refused before anything is written
    let mut wrong = MaskVolume::allocate(Dims::new(4, 4, 5)).unwrap();
    wrong.set_voxel(0, 0, 0, 1).unwrap();
    let err = store.save(&mut wrong, SaveMode::Overwrite).unwrap_err();
    assert!(matches!(err, Error::Core(_)));
    assert!(wrong.is_changed());
    assert_eq!(std::fs::read(&path).unwrap(), before);

    // a target in a missing directory fails without touching anything
    let mut missing = MaskStore::new(&cube_path, cube_header(dims))
        .with_mask_path(dir.path().join("gone").join("mask.fits"));
    let err = missing.save(&mut mask, SaveMode::Overwrite).unwrap_err();
    assert!(matches!(err, Error::Persistence { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_mask_of_scaled_cube_keeps_labels() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dims::new(2, 2, 2);
    let cube_path = dir.path().join("scaled.fits");
    let stored: Vec<i16> = (0..8).collect();
    write_image(&cube_path, &cube_header(dims), ImageData::I16(&stored)).unwrap();
    {
        let mut fptr = FitsFile::edit(&cube_path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_key(&mut fptr, "BSCALE", 0.5).unwrap();
        hdu.write_key(&mut fptr, "BZERO", 10.0).unwrap();
    }
    let loaded = FitsCubeLoader::new().load_cube(&cube_path).unwrap();
    assert_eq!(loaded.cube.voxel(1, 0, 0).unwrap(), 10.5);
    assert!(loaded.header.contains("BSCALE"));
    assert!(loaded.header.contains("BZERO"));

    let mut store = MaskStore::new(&cube_path, loaded.header.clone());
    let labels = vec![0, 5, 0, 0, 0, 0, 0, 3];
    let mut mask = MaskVolume::from_vec(labels.clone(), dims).unwrap();
    let saved = store.save(&mut mask, SaveMode::NewFile).unwrap();

    let reloaded = FitsCubeLoader::new().load_mask(&saved, dims).unwrap();
    assert_eq!(reloaded.data(), labels.as_slice());
    let written = FitsCubeReader::open(&saved).unwrap();
    assert!(!written.header().contains("BSCALE"));
    assert!(!written.header().contains("BZERO"));
    assert!(written.header().contains("OBJECT"));
}
