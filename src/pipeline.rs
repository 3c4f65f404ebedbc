//! Scene batch processing.
//!
//! Every scene runs the full chain (decode, clip, quality mask, models, zonal
//! statistics) and writes its own CSV, so scenes are independent and run in
//! parallel under the `parallel` feature. The SQLite store is filled by a
//! single writer once the batch is done.

use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{AreaMode, BiomassModel, ExportFormat, LocationConfig, SceneFilter};
use crate::core::biomass_model::evaluate_models;
use crate::core::quality_mask::{QualityMask, QualityMaskConfig, DEFAULT_AEROSOL_THRESHOLD};
use crate::core::zonal_stats::analyze;
use crate::io::metadata::ProductId;
use crate::io::parcels::ParcelSet;
use crate::io::scene_reader::{scene_wgs_bounds, SceneReader};
use crate::store::csv_store::{scene_csv_path, write_scene_records};
use crate::store::sqlite::ResultStore;
use crate::types::{BoundingBox, RangesatError, RangesatResult};

/// Per-run switches
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOptions {
    pub aerosol_threshold: f64,
    pub export_grids: bool,
    pub export_format: ExportFormat,
    pub area_mode: AreaMode,
    /// Reprocess scenes that already have a CSV or a failure marker
    pub overwrite: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            aerosol_threshold: DEFAULT_AEROSOL_THRESHOLD,
            export_grids: true,
            export_format: ExportFormat::default(),
            area_mode: AreaMode::default(),
            overwrite: false,
        }
    }
}

/// Everything a scene task needs, shared read-only across workers
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub models: Vec<BiomassModel>,
    pub parcels: ParcelSet,
    pub out_dir: PathBuf,
    /// Study area in WGS84; scenes are clipped to it
    pub study_bbox: Option<BoundingBox>,
    pub scene_filter: SceneFilter,
    pub options: ProcessingOptions,
}

impl ProcessingContext {
    pub fn new(
        models: Vec<BiomassModel>,
        parcels: ParcelSet,
        out_dir: PathBuf,
        options: ProcessingOptions,
    ) -> RangesatResult<Self> {
        if models.is_empty() {
            return Err(RangesatError::Configuration("no models configured".to_string()));
        }
        if parcels.is_empty() {
            return Err(RangesatError::Configuration("parcel set is empty".to_string()));
        }
        let study_bbox = parcels.wgs_bounds()?;
        Ok(Self {
            models,
            parcels,
            out_dir,
            study_bbox,
            scene_filter: SceneFilter::default(),
            options,
        })
    }

    /// Load the parcels named by `config` and build the context
    pub fn from_config(config: &LocationConfig) -> RangesatResult<Self> {
        let area_field = match &config.area_mode {
            AreaMode::Attribute(field) => Some(field.as_str()),
            AreaMode::PixelCount => None,
        };
        let parcels = ParcelSet::load(
            &config.sf_fn,
            &config.sf_feature_properties_key,
            &config.sf_feature_properties_delimiter,
            area_field,
        )?;
        let options = ProcessingOptions {
            aerosol_threshold: config.aerosol_threshold,
            export_grids: config.export_grids,
            export_format: config.export_format,
            area_mode: config.area_mode.clone(),
            overwrite: false,
        };
        let mut ctx = Self::new(config.models.clone(), parcels, config.out_dir.clone(), options)?;
        ctx.scene_filter = config.scene_filter.clone();
        Ok(ctx)
    }

    pub fn failure_marker(&self, product_id: &str) -> PathBuf {
        self.out_dir.join(format!("{}.failed", product_id))
    }
}

/// Summary of one successfully processed scene
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedScene {
    pub product_id: String,
    pub records: usize,
    pub accepted: usize,
    pub csv: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneOutcome {
    Processed(ProcessedScene),
    Skipped(String),
    Failed(String),
}

/// Per-scene results of a batch run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: Vec<ProcessedScene>,
    /// (scene, reason)
    pub skipped: Vec<(String, String)>,
    /// (scene, reason)
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.processed.len() + self.skipped.len() + self.failed.len()
    }

    fn push(&mut self, scene: String, outcome: SceneOutcome) {
        match outcome {
            SceneOutcome::Processed(done) => self.processed.push(done),
            SceneOutcome::Skipped(reason) => self.skipped.push((scene, reason)),
            SceneOutcome::Failed(reason) => self.failed.push((scene, reason)),
        }
    }
}

/// Product id encoded in a scene directory or archive name
pub fn scene_product_id(path: &Path) -> Option<ProductId> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    stem.parse().ok()
}

/// Scene directories and zip archives in `dir` whose names are product ids
pub fn discover_scenes(dir: &Path) -> RangesatResult<Vec<PathBuf>> {
    let mut scenes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_source = path.is_dir()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case("zip"));
        if is_source && scene_product_id(&path).is_some() {
            scenes.push(path);
        } else {
            log::debug!("Not a scene: {}", path.display());
        }
    }
    scenes.sort();
    log::info!("Found {} scenes in {}", scenes.len(), dir.display());
    Ok(scenes)
}

/// Run the full chain on one scene. Errors propagate unclassified.
///
/// The study-area check reads only the `pixel_qa` header. Band outputs are
/// written once at least one model has evaluated.
pub fn process_scene(ctx: &ProcessingContext, path: &Path) -> RangesatResult<ProcessedScene> {
    let started = Instant::now();
    if let Some(study) = &ctx.study_bbox {
        let extent = scene_wgs_bounds(path)?;
        if !extent.intersects(study) {
            return Err(RangesatError::GeometryMismatch(format!(
                "scene extent {} misses the study area {}",
                extent, study
            )));
        }
    }

    let reader = SceneReader::open(path)?;
    let product_id = reader.product_id().id.clone();
    let scene = match &ctx.study_bbox {
        Some(study) => reader.read_clipped(study, None)?,
        None => reader.read()?,
    };

    let mask = QualityMask::build(
        &scene,
        &QualityMaskConfig {
            aerosol_threshold: ctx.options.aerosol_threshold,
        },
    )?;

    let evaluation = evaluate_models(&scene, &mask, &ctx.models);
    if evaluation.grids.is_empty() {
        return Err(evaluation
            .skipped
            .into_iter()
            .map(|(_, err)| err)
            .next()
            .unwrap_or_else(|| RangesatError::Processing("no model could be evaluated".to_string())));
    }
    let scene_dir = scene.save(&ctx.out_dir)?;

    if ctx.options.export_grids {
        let biomass_dir = scene_dir.join("biomass");
        for grid in &evaluation.grids {
            grid.export(&scene, &biomass_dir, ctx.options.export_format)?;
        }
    }

    let records = analyze(
        &scene,
        &mask,
        &evaluation.grids,
        &ctx.parcels,
        &ctx.models,
        &ctx.options.area_mode,
    )?;
    let csv = write_scene_records(&ctx.out_dir, &product_id, &records)?;

    log::info!("Processed {} in {:.1}s", product_id, started.elapsed().as_secs_f64());
    Ok(ProcessedScene {
        accepted: records.iter().filter(|r| r.is_accepted()).count(),
        records: records.len(),
        product_id,
        csv,
    })
}

/// Process one scene and classify the result. Failures leave a
/// `<product_id>.failed` marker so later runs skip the scene.
pub fn run_scene(ctx: &ProcessingContext, path: &Path) -> SceneOutcome {
    let product = match scene_product_id(path) {
        Some(p) => p,
        None => return SceneOutcome::Skipped(format!("{} is not named after a product id", path.display())),
    };
    let product_id = product.id.as_str();

    if let Some(reason) = ctx
        .scene_filter
        .exclusion_reason(&product.wrs, chrono::Datelike::year(&product.acquisition_date))
    {
        log::debug!("Skipping {}: {}", product_id, reason);
        return SceneOutcome::Skipped(reason);
    }

    let marker = ctx.failure_marker(product_id);
    if !ctx.options.overwrite {
        if scene_csv_path(&ctx.out_dir, product_id).exists() {
            return SceneOutcome::Skipped("already processed".to_string());
        }
        if marker.exists() {
            let reason = std::fs::read_to_string(&marker).unwrap_or_default();
            return SceneOutcome::Skipped(format!("previously failed: {}", reason.trim()));
        }
    } else if marker.exists() {
        if let Err(e) = std::fs::remove_file(&marker) {
            log::warn!("Cannot remove {}: {}", marker.display(), e);
        }
    }

    match process_scene(ctx, path) {
        Ok(done) => SceneOutcome::Processed(done),
        Err(RangesatError::GeometryMismatch(reason)) => {
            log::info!("Skipping {}: {}", product_id, reason);
            SceneOutcome::Skipped(reason)
        }
        Err(err) => {
            let reason = err.to_string();
            log::error!("Failed to process {}: {}", product_id, reason);
            let written = std::fs::create_dir_all(&ctx.out_dir).and_then(|_| std::fs::write(&marker, &reason));
            if let Err(e) = written {
                log::warn!("Cannot write failure marker {}: {}", marker.display(), e);
            }
            let partial = ctx.out_dir.join(product_id);
            if partial.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&partial) {
                    log::warn!("Cannot remove partial output {}: {}", partial.display(), e);
                }
            }
            SceneOutcome::Failed(reason)
        }
    }
}

/// Process scenes, in parallel when the `parallel` feature is enabled
pub fn run_batch(ctx: &ProcessingContext, scenes: &[PathBuf]) -> BatchReport {
    let started = Instant::now();

    #[cfg(feature = "parallel")]
    let outcomes: Vec<SceneOutcome> = scenes.par_iter().map(|path| run_scene(ctx, path)).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<SceneOutcome> = scenes.iter().map(|path| run_scene(ctx, path)).collect();

    let mut report = BatchReport::default();
    for (path, outcome) in scenes.iter().zip(outcomes) {
        let name = scene_product_id(path)
            .map(|p| p.id)
            .unwrap_or_else(|| path.display().to_string());
        report.push(name, outcome);
    }

    log::info!(
        "Batch done in {:.1}s: {} processed, {} skipped, {} failed",
        started.elapsed().as_secs_f64(),
        report.processed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    report
}

/// Merge every scene CSV in `out_dir` into the location's SQLite database
pub fn build_database(out_dir: &Path, db_path: &Path) -> RangesatResult<usize> {
    let mut store = ResultStore::open(db_path)?;
    store.ingest_csv_dir(out_dir)
}

/// Process every scene of a location and rebuild its database
pub fn process_location(config: &LocationConfig, overwrite: bool) -> RangesatResult<BatchReport> {
    let scene_dir = config.landsat_scene_directory.as_ref().ok_or_else(|| {
        RangesatError::Configuration("landsat_scene_directory is not configured".to_string())
    })?;
    let mut ctx = ProcessingContext::from_config(config)?;
    ctx.options.overwrite = overwrite;

    let scenes = discover_scenes(scene_dir)?;
    let report = run_batch(&ctx, &scenes);
    let rows = build_database(&config.out_dir, &config.db_path())?;
    log::info!("{} rows in {}", rows, config.db_path().display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_product_id_from_names() {
        let dir = Path::new("/data/LC08_L1TP_042028_20150510_20170301_01_T1");
        assert_eq!(
            scene_product_id(dir).unwrap().id,
            "LC08_L1TP_042028_20150510_20170301_01_T1"
        );
        let zip = Path::new("/data/LE07_L1TP_042028_20160507_20160602_01_T1.zip");
        assert_eq!(scene_product_id(zip).unwrap().wrs.to_string(), "042028");
        assert!(scene_product_id(Path::new("/data/notes.txt")).is_none());
    }

    #[test]
    fn test_discover_scenes_ignores_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("LC08_L1TP_042028_20150510_20170301_01_T1")).unwrap();
        std::fs::write(dir.path().join("LE07_L1TP_042028_20160507_20160602_01_T1.zip"), b"").unwrap();
        std::fs::create_dir(dir.path().join("biomass")).unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();

        let scenes = discover_scenes(dir.path()).unwrap();
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn test_context_requires_models_and_parcels() {
        let empty = ParcelSet::default();
        let result = ProcessingContext::new(vec![], empty, PathBuf::from("out"), ProcessingOptions::default());
        assert!(matches!(result, Err(RangesatError::Configuration(_))));
    }
}
