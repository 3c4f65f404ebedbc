//! Synthetic scenes and parcels shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rangesat::config::{BiomassModel, SatModelParameters};
use rangesat::core::indices::SpectralIndex;
use rangesat::core::rasterize::Polygon;
use rangesat::io::geotiff::{self, RasterLayer, SampleType};
use rangesat::io::{Parcel, ParcelSet};
use rangesat::{BoundingBox, GeoTransform, Satellite};

pub const PID: &str = "LC08_L1TP_042028_20150510_20170301_01_T1";
pub const ROWS: usize = 10;
pub const COLS: usize = 10;
pub const CELL: f64 = 30.0;
pub const ORIGIN: (f64, f64) = (500_000.0, 5_000_300.0);

pub const QA_CLEAR: f64 = 322.0;
pub const QA_WATER: f64 = 324.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bounding box of the pixel block `rows x cols` of a grid anchored at `origin`
pub fn pixel_bbox(origin: (f64, f64), rows: (usize, usize), cols: (usize, usize)) -> BoundingBox {
    BoundingBox::new(
        origin.0 + cols.0 as f64 * CELL,
        origin.1 - rows.1 as f64 * CELL,
        origin.0 + cols.1 as f64 * CELL,
        origin.1 - rows.0 as f64 * CELL,
    )
}

/// Band values of a synthetic OLI scene. Index bands hold scaled integers.
pub struct SceneBands {
    pub pixel_qa: Array2<f64>,
    pub aerosol: Array2<f64>,
    pub ndvi: Array2<f64>,
    pub nbr: Array2<f64>,
    pub nbr2: Array2<f64>,
}

impl Default for SceneBands {
    fn default() -> Self {
        Self {
            pixel_qa: Array2::from_elem((ROWS, COLS), QA_CLEAR),
            aerosol: Array2::from_elem((ROWS, COLS), 64.0),
            ndvi: Array2::from_elem((ROWS, COLS), 6000.0),
            nbr: Array2::from_elem((ROWS, COLS), 4000.0),
            nbr2: Array2::from_elem((ROWS, COLS), 2000.0),
        }
    }
}

fn metadata_xml() -> String {
    let index_band = |name: &str| {
        format!(
            r#"    <band product="spectral_indices" name="{}" data_type="INT16" fill_value="-9999" scale_factor="0.000100">
      <valid_range min="-10000.000000" max="10000.000000"/>
    </band>
"#,
            name
        )
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<espa_metadata version="2.0">
  <global_metadata>
    <satellite>LANDSAT_8</satellite>
    <instrument>OLI/TIRS_Combined</instrument>
    <acquisition_date>2015-05-10</acquisition_date>
    <wrs system="2" path="42" row="28"/>
  </global_metadata>
  <bands>
    <band product="level2_qa" name="pixel_qa" data_type="UINT16" fill_value="1"/>
    <band product="sr_refl" name="sr_aerosol" data_type="UINT8" fill_value="1"/>
{}{}{}  </bands>
</espa_metadata>
"#,
        index_band("sr_ndvi"),
        index_band("sr_nbr"),
        index_band("sr_nbr2")
    )
}

/// Write a scene directory named after `pid` under `root`
pub fn write_scene(root: &Path, pid: &str, origin: (f64, f64), bands: &SceneBands) -> PathBuf {
    let dir = root.join(pid);
    std::fs::create_dir_all(&dir).unwrap();
    let transform = GeoTransform::north_up(origin.0, origin.1, CELL);

    let layers = [
        ("pixel_qa", &bands.pixel_qa, 1.0, SampleType::UInt16),
        ("sr_aerosol", &bands.aerosol, 1.0, SampleType::UInt8),
        ("sr_ndvi", &bands.ndvi, -9999.0, SampleType::Int16),
        ("sr_nbr", &bands.nbr, -9999.0, SampleType::Int16),
        ("sr_nbr2", &bands.nbr2, -9999.0, SampleType::Int16),
    ];
    for (name, data, nodata, sample_type) in layers {
        let layer = RasterLayer {
            data: data.clone(),
            transform,
            crs_wkt: String::new(),
            nodata: Some(nodata),
        };
        geotiff::write_band(dir.join(format!("{}_{}.tif", pid, name)), &layer, sample_type).unwrap();
    }
    std::fs::write(dir.join(format!("{}.xml", pid)), metadata_xml()).unwrap();
    dir
}

pub fn parcel(key: &str, bbox: BoundingBox) -> Parcel {
    Parcel::from_key(key, "+", vec![Polygon::rectangle(&bbox)], None).unwrap()
}

/// North pasture covers rows 2..6, South pasture rows 6..10, both in columns 2..6
pub fn parcels() -> ParcelSet {
    ParcelSet::new(
        vec![
            parcel("North+Ranch_A", pixel_bbox(ORIGIN, (2, 6), (2, 6))),
            parcel("South+Ranch_A", pixel_bbox(ORIGIN, (6, 10), (2, 6))),
        ],
        String::new(),
    )
    .unwrap()
}

/// NDVI above 0.5 selects the NBR summer equation, else the NBR2 fall equation
pub fn model(name: &str, required_coverage: f64, minimum_area_ha: f64) -> BiomassModel {
    BiomassModel {
        name: name.to_string(),
        satellite_pars: vec![SatModelParameters {
            satellite: Satellite::Landsat8,
            discriminate_index: SpectralIndex::Ndvi,
            discriminate_threshold: Some(0.5),
            summer_index: SpectralIndex::Nbr,
            summer_slope: 100.0,
            summer_intercept: 0.0,
            fall_index: SpectralIndex::Nbr2,
            fall_slope: 100.0,
            fall_intercept: 0.0,
            required_coverage,
            minimum_area_ha,
            log_linear: false,
        }],
    }
}
