mod common;

use approx::assert_relative_eq;
use common::*;
use rangesat::core::{QualityMask, QualityMaskConfig, SpectralIndex};
use rangesat::io::{Scene, SceneReader};
use rangesat::Satellite;
use tempfile::TempDir;

#[test]
fn test_open_scene_directory() {
    init_logging();
    let root = TempDir::new().unwrap();
    let dir = write_scene(root.path(), PID, ORIGIN, &SceneBands::default());

    let scene = Scene::open(&dir).unwrap();
    assert_eq!(scene.product_id(), PID);
    assert_eq!(scene.satellite(), Satellite::Landsat8);
    assert_eq!(scene.shape(), (ROWS, COLS));
    assert_relative_eq!(scene.cellsize(), CELL);
    assert!(scene.has_band("sr_nbr2"));

    let bounds = scene.bounds();
    assert_relative_eq!(bounds.left, ORIGIN.0);
    assert_relative_eq!(bounds.top, ORIGIN.1);
    assert_relative_eq!(bounds.width(), COLS as f64 * CELL);
}

#[test]
fn test_index_reads_are_pure() {
    init_logging();
    let root = TempDir::new().unwrap();
    let mut bands = SceneBands::default();
    bands.ndvi[[0, 0]] = -9999.0;
    let dir = write_scene(root.path(), PID, ORIGIN, &bands);
    let scene = Scene::open(&dir).unwrap();

    let first = scene.index(SpectralIndex::Ndvi).unwrap();
    let second = scene.index(SpectralIndex::Ndvi).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get(0, 0), None);
    assert_relative_eq!(first.get(1, 1).unwrap(), 0.6, epsilon = 1e-9);
    assert_eq!(first.valid_count(), ROWS * COLS - 1);
}

#[test]
fn test_clipped_read_keeps_geometry() {
    init_logging();
    let root = TempDir::new().unwrap();
    let dir = write_scene(root.path(), PID, ORIGIN, &SceneBands::default());
    let reader = SceneReader::open(&dir).unwrap();

    let bbox = pixel_bbox(ORIGIN, (2, 6), (3, 8));
    let clipped = reader.read_clipped(&bbox, Some(&["sr_ndvi"])).unwrap();
    assert_eq!(clipped.shape(), (4, 5));
    assert_relative_eq!(clipped.bounds().left, bbox.left);
    assert_relative_eq!(clipped.bounds().top, bbox.top);
    assert!(clipped.has_band("pixel_qa"));
    assert!(clipped.has_band("sr_ndvi"));
    assert!(!clipped.has_band("sr_nbr"));
}

#[test]
fn test_raising_aerosol_threshold_never_adds_invalid_pixels() {
    init_logging();
    let root = TempDir::new().unwrap();
    let mut bands = SceneBands::default();
    for (i, v) in bands.aerosol.iter_mut().enumerate() {
        *v = (i * 2 % 250) as f64 + 2.0;
    }
    bands.pixel_qa[[0, 0]] = QA_WATER;
    let dir = write_scene(root.path(), PID, ORIGIN, &bands);
    let scene = Scene::open(&dir).unwrap();

    let invalid_count = |threshold: f64| {
        let mask = QualityMask::build(&scene, &QualityMaskConfig { aerosol_threshold: threshold }).unwrap();
        mask.composite_invalid().iter().filter(|&&b| b).count()
    };
    let counts: Vec<usize> = [0.0, 50.0, 101.0, 150.0, 255.0]
        .iter()
        .map(|&t| invalid_count(t))
        .collect();
    assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    // water stays invalid whatever the threshold
    assert_eq!(*counts.last().unwrap(), 1);
}

#[test]
fn test_scene_without_quality_band_is_rejected() {
    init_logging();
    let root = TempDir::new().unwrap();
    let dir = write_scene(root.path(), PID, ORIGIN, &SceneBands::default());
    std::fs::remove_file(dir.join(format!("{}_pixel_qa.tif", PID))).unwrap();
    assert!(SceneReader::open(&dir).is_err());
}
