//! Per-pasture zonal statistics.
//!
//! Each parcel is burned into the scene grid (pixel-center rule) and the
//! biomass grids are reduced over its valid pixels. Statistics are only
//! reported for pastures whose coverage and area pass the model's gate.

use crate::config::{AreaMode, BiomassModel};
use crate::core::biomass_model::BiomassGrid;
use crate::core::indices::SpectralIndex;
use crate::core::masked::{count_both, MaskedGrid};
use crate::core::quality_mask::QualityMask;
use crate::core::rasterize::rasterize;
use crate::core::statistics::{self, Summary};
use crate::io::parcels::{Parcel, ParcelSet};
use crate::io::scene_reader::{Scene, SceneSummary};
use crate::store::record::PastureStatRecord;
use crate::types::{BoolGrid, RangesatError, RangesatResult};

const SQ_M_PER_HA: f64 = 1e4;
/// grams per square meter times hectares to kilograms
const GPM_HA_TO_KG: f64 = 10.0;

/// Pixel accounting of one parcel against the quality mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelCounts {
    pub total: usize,
    pub snow: usize,
    pub water: usize,
    pub aerosol: usize,
    pub valid: usize,
}

impl PixelCounts {
    pub fn count(inside: &BoolGrid, mask: &QualityMask, valid: &BoolGrid) -> RangesatResult<Self> {
        Ok(Self {
            total: inside.iter().filter(|&&v| v).count(),
            snow: count_both(inside, &mask.snow)?,
            water: count_both(inside, &mask.water)?,
            aerosol: count_both(inside, &mask.aerosol_exceeded)?,
            valid: count_both(inside, valid)?,
        })
    }

    /// `valid / total`, 0 for an empty parcel
    pub fn coverage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64
        }
    }
}

/// Biomass statistics of an accepted pasture
#[derive(Debug, Clone, PartialEq)]
pub struct BiomassStats {
    pub summary: Summary,
    /// Uses the quality-valid pixel count of the parcel
    pub ci90: f64,
    pub total_kg: f64,
    pub summer_vi_mean: Option<f64>,
    pub fall_vi_mean: Option<f64>,
    pub fraction_summer: Option<f64>,
}

/// Reduce one model's grids over `inside`. `None` when no valid biomass pixel remains.
pub fn biomass_stats(
    grid: &BiomassGrid,
    inside: &BoolGrid,
    counts: &PixelCounts,
    area_ha: f64,
) -> RangesatResult<Option<BiomassStats>> {
    let summary = match Summary::of(&grid.biomass.values_in(inside)?) {
        Some(summary) => summary,
        None => return Ok(None),
    };
    let fraction_summer = match (&grid.summer_mask, counts.total) {
        (Some(summer), total) if total > 0 => Some(count_both(inside, summer)? as f64 / total as f64),
        _ => None,
    };
    Ok(Some(BiomassStats {
        ci90: statistics::ci90(summary.sd, counts.valid.max(1)).unwrap_or(0.0),
        total_kg: summary.mean * area_ha * GPM_HA_TO_KG,
        summer_vi_mean: statistics::mean(&grid.summer_vi.values_in(inside)?),
        fall_vi_mean: statistics::mean(&grid.fall_vi.values_in(inside)?),
        fraction_summer,
        summary,
    }))
}

/// Area of a parcel in hectares under `area_mode`
pub fn parcel_area_ha(parcel: &Parcel, counts: &PixelCounts, cellsize: f64, area_mode: &AreaMode) -> f64 {
    let from_pixels = counts.total as f64 * cellsize * cellsize / SQ_M_PER_HA;
    match area_mode {
        AreaMode::PixelCount => from_pixels,
        AreaMode::Attribute(field) => match parcel.area_ha {
            Some(area) => area,
            None => {
                log::warn!(
                    "Parcel {} has no '{}' attribute, using the pixel count area",
                    parcel.key,
                    field
                );
                from_pixels
            }
        },
    }
}

/// Raw index statistics, masked by the composite quality mask
struct IndexGrids {
    ndvi: Option<MaskedGrid>,
    nbr: Option<MaskedGrid>,
    nbr2: Option<MaskedGrid>,
}

impl IndexGrids {
    fn load(scene: &Scene, invalid: &BoolGrid) -> RangesatResult<Self> {
        let load = |index: SpectralIndex| match scene.index(index) {
            Ok(grid) => grid.mask_where(invalid).map(Some),
            Err(err) => {
                log::debug!("No {} statistics for {}: {}", index, scene.product_id(), err);
                Ok(None)
            }
        };
        Ok(Self {
            ndvi: load(SpectralIndex::Ndvi)?,
            nbr: load(SpectralIndex::Nbr)?,
            nbr2: load(SpectralIndex::Nbr2)?,
        })
    }
}

fn index_summary(grid: &Option<MaskedGrid>, inside: &BoolGrid, counts: &PixelCounts) -> RangesatResult<Option<Summary>> {
    match grid {
        Some(g) if counts.valid > 0 => Ok(Summary::of(&g.values_in(inside)?)),
        _ => Ok(None),
    }
}

/// Zonal statistics of every (parcel, model) pair of a scene, in parcel order
/// then model order. Models without an evaluated grid produce no records.
pub fn analyze(
    scene: &Scene,
    mask: &QualityMask,
    grids: &[BiomassGrid],
    parcels: &ParcelSet,
    models: &[BiomassModel],
    area_mode: &AreaMode,
) -> RangesatResult<Vec<PastureStatRecord>> {
    if mask.dim() != scene.shape() {
        return Err(RangesatError::GeometryMismatch(format!(
            "quality mask {:?} does not match scene {:?}",
            mask.dim(),
            scene.shape()
        )));
    }

    let parcels = parcels.reprojected(scene.crs_wkt())?;
    let summary = scene.summary()?;
    let invalid = mask.composite_invalid();
    let valid = invalid.mapv(|bad| !bad);
    let indices = IndexGrids::load(scene, &invalid)?;

    let ordered: Vec<&BiomassGrid> = models
        .iter()
        .filter_map(|m| grids.iter().find(|g| g.model == m.name))
        .collect();

    let mut records = Vec::with_capacity(parcels.len() * ordered.len());
    for parcel in &parcels.parcels {
        let inside = rasterize(&parcel.polygons, scene.transform(), scene.shape())?;
        let counts = PixelCounts::count(&inside, mask, &valid)?;
        if counts.total == 0 {
            log::warn!("Parcel {} covers no pixels of {}", parcel.key, scene.product_id());
        }
        let coverage = counts.coverage();
        let area_ha = parcel_area_ha(parcel, &counts, scene.cellsize(), area_mode);

        let ndvi = index_summary(&indices.ndvi, &inside, &counts)?;
        let nbr = index_summary(&indices.nbr, &inside, &counts)?;
        let nbr2 = index_summary(&indices.nbr2, &inside, &counts)?;

        for grid in &ordered {
            let pars = &grid.parameters;
            let accepted = coverage > pars.required_coverage && area_ha > pars.minimum_area_ha;
            let stats = if accepted {
                biomass_stats(grid, &inside, &counts, area_ha)?
            } else {
                None
            };
            records.push(build_record(
                &summary, parcel, &grid.model, &counts, coverage, area_ha, stats.as_ref(), [ndvi, nbr, nbr2],
            ));
        }
    }

    // running count in record order, the current record included
    let mut accepted = 0;
    for record in &mut records {
        if record.is_accepted() {
            accepted += 1;
        }
        record.valid_pastures_cnt = accepted;
    }

    log::info!(
        "Zonal statistics for {}: {} records, {} accepted",
        scene.product_id(),
        records.len(),
        accepted
    );
    Ok(records)
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    scene: &SceneSummary,
    parcel: &Parcel,
    model: &str,
    counts: &PixelCounts,
    coverage: f64,
    area_ha: f64,
    stats: Option<&BiomassStats>,
    raw: [Option<Summary>; 3],
) -> PastureStatRecord {
    let [ndvi, nbr, nbr2] = raw;
    let biomass = stats.map(|s| &s.summary);
    PastureStatRecord {
        product_id: scene.product_id.clone(),
        key: parcel.key.clone(),
        pasture: parcel.pasture.clone(),
        ranch: parcel.ranch.clone(),
        model: model.to_string(),
        total_px: counts.total as u64,
        snow_px: counts.snow as u64,
        water_px: counts.water as u64,
        aerosol_px: counts.aerosol as u64,
        valid_px: counts.valid as u64,
        coverage,
        area_ha,
        biomass_mean_gpm: biomass.map(|s| s.mean),
        biomass_sd_gpm: biomass.map(|s| s.sd),
        biomass_ci90_gpm: stats.map(|s| s.ci90),
        biomass_10pct_gpm: biomass.map(|s| s.p10),
        biomass_75pct_gpm: biomass.map(|s| s.p75),
        biomass_90pct_gpm: biomass.map(|s| s.p90),
        biomass_total_kg: stats.map(|s| s.total_kg),
        summer_vi_mean_gpm: stats.and_then(|s| s.summer_vi_mean),
        fall_vi_mean_gpm: stats.and_then(|s| s.fall_vi_mean),
        fraction_summer: stats.and_then(|s| s.fraction_summer),
        ndvi_mean: ndvi.map(|s| s.mean),
        ndvi_sd: ndvi.map(|s| s.sd),
        ndvi_10pct: ndvi.map(|s| s.p10),
        ndvi_75pct: ndvi.map(|s| s.p75),
        ndvi_90pct: ndvi.map(|s| s.p90),
        ndvi_ci90: ndvi.map(|s| s.ci90),
        nbr_mean: nbr.map(|s| s.mean),
        nbr_sd: nbr.map(|s| s.sd),
        nbr_10pct: nbr.map(|s| s.p10),
        nbr_75pct: nbr.map(|s| s.p75),
        nbr_90pct: nbr.map(|s| s.p90),
        nbr_ci90: nbr.map(|s| s.ci90),
        nbr2_mean: nbr2.map(|s| s.mean),
        nbr2_sd: nbr2.map(|s| s.sd),
        nbr2_10pct: nbr2.map(|s| s.p10),
        nbr2_75pct: nbr2.map(|s| s.p75),
        nbr2_90pct: nbr2.map(|s| s.p90),
        nbr2_ci90: nbr2.map(|s| s.ci90),
        satellite: scene.satellite,
        acquisition_date: scene.acquisition_date,
        wrs_path: scene.wrs.path,
        wrs_row: scene.wrs.row,
        bounds: scene.bounds.to_string(),
        wgs_bounds: scene.wgs_bounds.map(|b| b.to_string()),
        valid_pastures_cnt: 0,
    }
}
