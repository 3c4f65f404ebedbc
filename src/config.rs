//! Location configuration.
//!
//! One YAML file per location describes the parcel source, the biomass models
//! and the scene filters. Relative paths resolve against the directory that
//! holds the YAML file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::indices::SpectralIndex;
use crate::core::quality_mask::DEFAULT_AEROSOL_THRESHOLD;
use crate::types::{RangesatError, RangesatResult, Satellite, Wrs};

/// Regression parameters of one model for one sensor generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatModelParameters {
    pub satellite: Satellite,
    #[serde(default = "default_discriminate_index")]
    pub discriminate_index: SpectralIndex,
    #[serde(default, alias = "ndvi_threshold")]
    pub discriminate_threshold: Option<f64>,
    #[serde(default = "default_summer_index")]
    pub summer_index: SpectralIndex,
    #[serde(alias = "summer_slp")]
    pub summer_slope: f64,
    #[serde(alias = "summer_int")]
    pub summer_intercept: f64,
    #[serde(default = "default_fall_index")]
    pub fall_index: SpectralIndex,
    #[serde(alias = "fall_slp")]
    pub fall_slope: f64,
    #[serde(alias = "fall_int")]
    pub fall_intercept: f64,
    pub required_coverage: f64,
    pub minimum_area_ha: f64,
    /// Exponentiate the linear predictor instead of clipping it
    #[serde(default)]
    pub log_linear: bool,
}

fn default_discriminate_index() -> SpectralIndex {
    SpectralIndex::Ndvi
}

fn default_summer_index() -> SpectralIndex {
    SpectralIndex::Nbr
}

fn default_fall_index() -> SpectralIndex {
    SpectralIndex::Nbr2
}

impl SatModelParameters {
    fn validate(&self, model: &str) -> RangesatResult<()> {
        let fail = |what: String| {
            Err(RangesatError::Configuration(format!(
                "model '{}', Landsat {}: {}",
                model, self.satellite, what
            )))
        };

        if !(0.0..=1.0).contains(&self.required_coverage) {
            return fail(format!("required_coverage {} outside [0, 1]", self.required_coverage));
        }
        if !(self.minimum_area_ha >= 0.0) {
            return fail(format!("minimum_area_ha {} is negative", self.minimum_area_ha));
        }
        if let Some(threshold) = self.discriminate_threshold {
            if self.discriminate_index.is_normalized() && !(-1.0..=1.0).contains(&threshold) {
                return fail(format!(
                    "{} threshold {} outside [-1, 1]",
                    self.discriminate_index, threshold
                ));
            }
        }
        let coefficients = [
            self.summer_slope,
            self.summer_intercept,
            self.fall_slope,
            self.fall_intercept,
        ];
        if coefficients.iter().any(|c| !c.is_finite()) {
            return fail("regression coefficients must be finite".to_string());
        }
        Ok(())
    }
}

/// A named biomass model with per-satellite parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomassModel {
    pub name: String,
    pub satellite_pars: Vec<SatModelParameters>,
}

impl BiomassModel {
    pub fn parameters_for(&self, satellite: Satellite) -> Option<&SatModelParameters> {
        self.satellite_pars.iter().find(|p| p.satellite == satellite)
    }

    fn validate(&self) -> RangesatResult<()> {
        if self.name.trim().is_empty() {
            return Err(RangesatError::Configuration("model with an empty name".to_string()));
        }
        if self.satellite_pars.is_empty() {
            return Err(RangesatError::Configuration(format!(
                "model '{}' has no satellite parameters",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for pars in &self.satellite_pars {
            if !seen.insert(pars.satellite) {
                return Err(RangesatError::Configuration(format!(
                    "model '{}' lists Landsat {} twice",
                    self.name, pars.satellite
                )));
            }
            pars.validate(&self.name)?;
        }
        Ok(())
    }
}

/// Source of the pasture area used for acceptance gating and totals
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaMode {
    /// `total_px * cellsize^2 * 1e-4`
    #[default]
    PixelCount,
    /// Hectares read from the named parcel attribute
    Attribute(String),
}

/// Pixel encoding of exported biomass grids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Physical values rounded to whole grams per square meter
    Rounded,
    #[default]
    Float32,
}

/// WRS path/row and year selection of scenes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFilter {
    /// WRS path/row codes (`"042028"`) never processed
    #[serde(default)]
    pub wrs_blacklist: Vec<String>,
    /// When present, only these WRS path/row codes are processed
    #[serde(default)]
    pub wrs_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub years: Option<Vec<i32>>,
}

impl SceneFilter {
    fn validate(&self) -> RangesatResult<()> {
        let whitelist = self.wrs_whitelist.iter().flatten();
        for code in self.wrs_blacklist.iter().chain(whitelist) {
            parse_wrs_code(code)?;
        }
        Ok(())
    }

    /// `None` when a scene at `wrs` acquired in `year` should be processed
    pub fn exclusion_reason(&self, wrs: &Wrs, year: i32) -> Option<String> {
        let code = wrs.to_string();
        if self.wrs_blacklist.iter().any(|c| c == &code) {
            return Some(format!("WRS {} is blacklisted", code));
        }
        if let Some(whitelist) = &self.wrs_whitelist {
            if !whitelist.iter().any(|c| c == &code) {
                return Some(format!("WRS {} is not whitelisted", code));
            }
        }
        if let Some(years) = &self.years {
            if !years.contains(&year) {
                return Some(format!("year {} is not selected", year));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Parcel vector file
    pub sf_fn: PathBuf,
    #[serde(default = "default_key_field")]
    pub sf_feature_properties_key: String,
    #[serde(default = "default_key_delimiter")]
    pub sf_feature_properties_delimiter: String,
    pub out_dir: PathBuf,
    #[serde(default)]
    pub landsat_scene_directory: Option<PathBuf>,
    pub models: Vec<BiomassModel>,
    #[serde(flatten)]
    pub scene_filter: SceneFilter,
    #[serde(default)]
    pub area_mode: AreaMode,
    #[serde(default = "default_aerosol_threshold")]
    pub aerosol_threshold: f64,
    #[serde(default = "default_true")]
    pub export_grids: bool,
    #[serde(default)]
    pub export_format: ExportFormat,
}

fn default_key_field() -> String {
    "key".to_string()
}

fn default_key_delimiter() -> String {
    "+".to_string()
}

fn default_aerosol_threshold() -> f64 {
    DEFAULT_AEROSOL_THRESHOLD
}

fn default_true() -> bool {
    true
}

impl LocationConfig {
    /// Load, resolve relative paths against the file's directory and validate
    pub fn load<P: AsRef<Path>>(path: P) -> RangesatResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RangesatError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        log::info!(
            "Loaded location config {} ({} models)",
            path.display(),
            config.models.len()
        );
        Ok(config)
    }

    /// Parse and validate without touching paths
    pub fn from_yaml_str(text: &str) -> RangesatResult<Self> {
        let config: LocationConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sf_fn);
        resolve(&mut self.out_dir);
        if let Some(dir) = self.landsat_scene_directory.as_mut() {
            resolve(dir);
        }
    }

    pub fn validate(&self) -> RangesatResult<()> {
        if self.models.is_empty() {
            return Err(RangesatError::Configuration("no models configured".to_string()));
        }
        if self.sf_feature_properties_delimiter.is_empty() {
            return Err(RangesatError::Configuration(
                "sf_feature_properties_delimiter must not be empty".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name.as_str()) {
                return Err(RangesatError::Configuration(format!(
                    "duplicate model name '{}'",
                    model.name
                )));
            }
            model.validate()?;
        }
        self.scene_filter.validate()
    }

    /// SQLite database location inside `out_dir`
    pub fn db_path(&self) -> PathBuf {
        self.out_dir.join("sqlite3.db")
    }
}

/// Parse a six digit WRS code such as `"042028"`
pub fn parse_wrs_code(code: &str) -> RangesatResult<Wrs> {
    let invalid = || RangesatError::Configuration(format!("invalid WRS path/row code '{}'", code));
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let path = code[..3].parse().map_err(|_| invalid())?;
    let row = code[3..].parse().map_err(|_| invalid())?;
    Ok(Wrs { path, row })
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
sf_fn: pastures/pastures.geojson
sf_feature_properties_key: PastureKey
out_dir: analyzed_rasters
models:
  - name: Herbaceous
    satellite_pars:
      - satellite: 8
        ndvi_threshold: 0.38
        summer_int: 10.0
        summer_slp: 200.0
        fall_int: 5.0
        fall_slp: 150.0
        required_coverage: 0.5
        minimum_area_ha: 1.0
      - satellite: 7
        discriminate_threshold: 0.35
        summer_intercept: 12.0
        summer_slope: 190.0
        fall_intercept: 6.0
        fall_slope: 140.0
        required_coverage: 0.5
        minimum_area_ha: 1.0
wrs_blacklist: ["042029"]
"#;

    #[test]
    fn test_parse_with_aliases_and_defaults() {
        let config = LocationConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.sf_feature_properties_delimiter, "+");
        assert_eq!(config.aerosol_threshold, 101.0);
        assert!(config.export_grids);
        assert_eq!(config.area_mode, AreaMode::PixelCount);

        let model = &config.models[0];
        let l8 = model.parameters_for(Satellite::Landsat8).unwrap();
        assert_eq!(l8.discriminate_index, SpectralIndex::Ndvi);
        assert_eq!(l8.discriminate_threshold, Some(0.38));
        assert_eq!(l8.summer_intercept, 10.0);
        assert_eq!(l8.fall_slope, 150.0);
        assert_eq!(l8.summer_index, SpectralIndex::Nbr);
        assert_eq!(l8.fall_index, SpectralIndex::Nbr2);
        assert!(!l8.log_linear);

        let l7 = model.parameters_for(Satellite::Landsat7).unwrap();
        assert_eq!(l7.summer_slope, 190.0);
        assert!(model.parameters_for(Satellite::Landsat5).is_none());
    }

    #[test]
    fn test_area_mode_and_export_format() {
        let yaml = format!("{}area_mode:\n  attribute: Hectares\nexport_format: rounded\n", YAML);
        let config = LocationConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.area_mode, AreaMode::Attribute("Hectares".to_string()));
        assert_eq!(config.export_format, ExportFormat::Rounded);
    }

    #[test]
    fn test_validation_rejects_bad_parameters() {
        let bad_coverage = YAML.replacen("required_coverage: 0.5", "required_coverage: 1.5", 1);
        assert!(matches!(
            LocationConfig::from_yaml_str(&bad_coverage),
            Err(RangesatError::Configuration(_))
        ));

        let bad_threshold = YAML.replacen("ndvi_threshold: 0.38", "ndvi_threshold: 3.8", 1);
        assert!(LocationConfig::from_yaml_str(&bad_threshold).is_err());

        let bad_index = YAML.replacen("ndvi_threshold: 0.38", "discriminate_index: foo", 1);
        assert!(LocationConfig::from_yaml_str(&bad_index).is_err());

        let bad_area = YAML.replacen("minimum_area_ha: 1.0", "minimum_area_ha: -1.0", 1);
        assert!(LocationConfig::from_yaml_str(&bad_area).is_err());

        let bad_satellite = YAML.replacen("satellite: 8", "satellite: 6", 1);
        assert!(LocationConfig::from_yaml_str(&bad_satellite).is_err());
    }

    #[test]
    fn test_duplicate_model_names_rejected() {
        let mut config = LocationConfig::from_yaml_str(YAML).unwrap();
        let copy = config.models[0].clone();
        config.models.push(copy);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("location.yaml");
        std::fs::write(&path, YAML).unwrap();

        let config = LocationConfig::load(&path).unwrap();
        assert_eq!(config.sf_fn, dir.path().join("pastures/pastures.geojson"));
        assert_eq!(config.db_path(), dir.path().join("analyzed_rasters").join("sqlite3.db"));
    }

    #[test]
    fn test_scene_filters() {
        let config = LocationConfig::from_yaml_str(YAML).unwrap();
        let mut filter = config.scene_filter;
        assert_eq!(filter.wrs_blacklist, vec!["042029".to_string()]);
        let wrs = Wrs { path: 42, row: 28 };
        assert!(filter.exclusion_reason(&wrs, 2015).is_none());
        assert!(filter.exclusion_reason(&Wrs { path: 42, row: 29 }, 2015).is_some());

        filter.years = Some(vec![2016]);
        assert!(filter.exclusion_reason(&wrs, 2015).is_some());

        filter.years = None;
        filter.wrs_whitelist = Some(vec!["043028".to_string()]);
        assert!(filter.exclusion_reason(&wrs, 2015).is_some());
        assert!(parse_wrs_code("42028").is_err());
    }
}
