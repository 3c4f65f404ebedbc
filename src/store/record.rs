use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Satellite;

/// One row of zonal statistics for a (scene, pasture, model) triple.
///
/// Statistics are `None` when the pasture failed the coverage/area gate or
/// had no valid pixels; they serialize as empty CSV cells and SQL NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastureStatRecord {
    pub product_id: String,
    pub key: String,
    pub pasture: String,
    pub ranch: String,
    pub model: String,

    pub total_px: u64,
    pub snow_px: u64,
    pub water_px: u64,
    pub aerosol_px: u64,
    pub valid_px: u64,
    pub coverage: f64,
    pub area_ha: f64,

    pub biomass_mean_gpm: Option<f64>,
    pub biomass_sd_gpm: Option<f64>,
    pub biomass_ci90_gpm: Option<f64>,
    pub biomass_10pct_gpm: Option<f64>,
    pub biomass_75pct_gpm: Option<f64>,
    pub biomass_90pct_gpm: Option<f64>,
    pub biomass_total_kg: Option<f64>,
    pub summer_vi_mean_gpm: Option<f64>,
    pub fall_vi_mean_gpm: Option<f64>,
    pub fraction_summer: Option<f64>,

    pub ndvi_mean: Option<f64>,
    pub ndvi_sd: Option<f64>,
    pub ndvi_10pct: Option<f64>,
    pub ndvi_75pct: Option<f64>,
    pub ndvi_90pct: Option<f64>,
    pub ndvi_ci90: Option<f64>,
    pub nbr_mean: Option<f64>,
    pub nbr_sd: Option<f64>,
    pub nbr_10pct: Option<f64>,
    pub nbr_75pct: Option<f64>,
    pub nbr_90pct: Option<f64>,
    pub nbr_ci90: Option<f64>,
    pub nbr2_mean: Option<f64>,
    pub nbr2_sd: Option<f64>,
    pub nbr2_10pct: Option<f64>,
    pub nbr2_75pct: Option<f64>,
    pub nbr2_90pct: Option<f64>,
    pub nbr2_ci90: Option<f64>,

    pub satellite: Satellite,
    pub acquisition_date: NaiveDate,
    pub wrs_path: u16,
    pub wrs_row: u16,
    /// Projected scene extent `[left, bottom, right, top]`
    pub bounds: String,
    pub wgs_bounds: Option<String>,
    /// Accepted (pasture, model) pairs of the scene up to and including this record
    pub valid_pastures_cnt: u64,
}

/// Biomass measures reduced by the aggregation queries
pub const MEASURES: [&str; 9] = [
    "biomass_mean_gpm",
    "biomass_ci90_gpm",
    "biomass_10pct_gpm",
    "biomass_75pct_gpm",
    "biomass_90pct_gpm",
    "biomass_total_kg",
    "biomass_sd_gpm",
    "summer_vi_mean_gpm",
    "fall_vi_mean_gpm",
];

impl PastureStatRecord {
    /// Whether the pasture passed the coverage and area gate
    pub fn is_accepted(&self) -> bool {
        self.biomass_mean_gpm.is_some()
    }

    pub fn year(&self) -> i32 {
        use chrono::Datelike;
        self.acquisition_date.year()
    }

    /// Value of one of [`MEASURES`]
    pub fn measure(&self, name: &str) -> Option<f64> {
        match name {
            "biomass_mean_gpm" => self.biomass_mean_gpm,
            "biomass_ci90_gpm" => self.biomass_ci90_gpm,
            "biomass_10pct_gpm" => self.biomass_10pct_gpm,
            "biomass_75pct_gpm" => self.biomass_75pct_gpm,
            "biomass_90pct_gpm" => self.biomass_90pct_gpm,
            "biomass_total_kg" => self.biomass_total_kg,
            "biomass_sd_gpm" => self.biomass_sd_gpm,
            "summer_vi_mean_gpm" => self.summer_vi_mean_gpm,
            "fall_vi_mean_gpm" => self.fall_vi_mean_gpm,
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Record with every biomass statistic derived from `mean` (`None` = rejected)
    pub fn record(ranch: &str, pasture: &str, model: &str, date: (i32, u32, u32), mean: Option<f64>) -> PastureStatRecord {
        let acquisition_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        let stat = |scale: f64| mean.map(|m| m * scale);
        PastureStatRecord {
            product_id: format!("LC08_L1TP_042028_{}_20170301_01_T1", acquisition_date.format("%Y%m%d")),
            key: format!("{}+{}", pasture, ranch),
            pasture: pasture.to_string(),
            ranch: ranch.to_string(),
            model: model.to_string(),
            total_px: 100,
            snow_px: 0,
            water_px: 2,
            aerosol_px: 1,
            valid_px: 90,
            coverage: 0.9,
            area_ha: 9.0,
            biomass_mean_gpm: stat(1.0),
            biomass_sd_gpm: stat(0.1),
            biomass_ci90_gpm: stat(0.02),
            biomass_10pct_gpm: stat(0.8),
            biomass_75pct_gpm: stat(1.1),
            biomass_90pct_gpm: stat(1.2),
            biomass_total_kg: stat(90.0),
            summer_vi_mean_gpm: stat(0.75),
            fall_vi_mean_gpm: stat(0.25),
            fraction_summer: mean.map(|_| 0.5),
            ndvi_mean: Some(0.45),
            ndvi_sd: Some(0.05),
            ndvi_10pct: Some(0.4),
            ndvi_75pct: Some(0.5),
            ndvi_90pct: Some(0.52),
            ndvi_ci90: Some(0.008),
            nbr_mean: None,
            nbr_sd: None,
            nbr_10pct: None,
            nbr_75pct: None,
            nbr_90pct: None,
            nbr_ci90: None,
            nbr2_mean: None,
            nbr2_sd: None,
            nbr2_10pct: None,
            nbr2_75pct: None,
            nbr2_90pct: None,
            nbr2_ci90: None,
            satellite: Satellite::Landsat8,
            acquisition_date,
            wrs_path: 42,
            wrs_row: 28,
            bounds: "[500000, 4990000, 506000, 5000000]".to_string(),
            wgs_bounds: None,
            valid_pastures_cnt: 1,
        }
    }
}
