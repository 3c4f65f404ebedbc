use std::path::{Path, PathBuf};

use crate::store::record::PastureStatRecord;
use crate::types::RangesatResult;

const SUFFIX: &str = "_pasture_stats.csv";

/// `<dir>/<product_id>_pasture_stats.csv`
pub fn scene_csv_path(dir: &Path, product_id: &str) -> PathBuf {
    dir.join(format!("{}{}", product_id, SUFFIX))
}

/// Write one scene's records. The header is written even for an empty scene.
pub fn write_scene_records(dir: &Path, product_id: &str, records: &[PastureStatRecord]) -> RangesatResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = scene_csv_path(dir, product_id);
    let tmp = path.with_extension("csv.partial");

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&tmp)?;
    writer.write_record(csv_header())?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, &path)?;

    log::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(path)
}

/// Column names in serialization order
pub fn csv_header() -> Vec<&'static str> {
    vec![
        "product_id",
        "key",
        "pasture",
        "ranch",
        "model",
        "total_px",
        "snow_px",
        "water_px",
        "aerosol_px",
        "valid_px",
        "coverage",
        "area_ha",
        "biomass_mean_gpm",
        "biomass_sd_gpm",
        "biomass_ci90_gpm",
        "biomass_10pct_gpm",
        "biomass_75pct_gpm",
        "biomass_90pct_gpm",
        "biomass_total_kg",
        "summer_vi_mean_gpm",
        "fall_vi_mean_gpm",
        "fraction_summer",
        "ndvi_mean",
        "ndvi_sd",
        "ndvi_10pct",
        "ndvi_75pct",
        "ndvi_90pct",
        "ndvi_ci90",
        "nbr_mean",
        "nbr_sd",
        "nbr_10pct",
        "nbr_75pct",
        "nbr_90pct",
        "nbr_ci90",
        "nbr2_mean",
        "nbr2_sd",
        "nbr2_10pct",
        "nbr2_75pct",
        "nbr2_90pct",
        "nbr2_ci90",
        "satellite",
        "acquisition_date",
        "wrs_path",
        "wrs_row",
        "bounds",
        "wgs_bounds",
        "valid_pastures_cnt",
    ]
}

pub fn read_records<P: AsRef<Path>>(path: P) -> RangesatResult<Vec<PastureStatRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    log::debug!("Read {} records from {}", records.len(), path.as_ref().display());
    Ok(records)
}

/// Per-scene CSV files in `dir`, sorted by name
pub fn scene_csv_files(dir: &Path) -> RangesatResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_stats = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(SUFFIX));
        if path.is_file() && is_stats {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
