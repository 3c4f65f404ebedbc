use std::collections::HashMap;
use std::path::Path;

use crate::config::{BiomassModel, ExportFormat, SatModelParameters};
use crate::core::indices::SpectralIndex;
use crate::core::masked::MaskedGrid;
use crate::core::quality_mask::QualityMask;
use crate::io::scene_reader::Scene;
use crate::types::{BoolGrid, RangesatError, RangesatResult, DEFAULT_NODATA};

/// Per-model biomass grids of one scene, in grams per square meter
#[derive(Debug, Clone)]
pub struct BiomassGrid {
    pub model: String,
    pub parameters: SatModelParameters,
    pub summer_vi: MaskedGrid,
    pub fall_vi: MaskedGrid,
    pub biomass: MaskedGrid,
    /// `None` when the model has no discriminator threshold
    pub summer_mask: Option<BoolGrid>,
}

impl BiomassGrid {
    /// Evaluate one model. `index` supplies spectral index grids and `invalid`
    /// is the composite quality mask.
    pub fn evaluate<F>(
        model: &str,
        parameters: &SatModelParameters,
        invalid: &BoolGrid,
        mut index: F,
    ) -> RangesatResult<Self>
    where
        F: FnMut(SpectralIndex) -> RangesatResult<MaskedGrid>,
    {
        let summer_mask = match parameters.discriminate_threshold {
            Some(threshold) => {
                let discriminator = index(parameters.discriminate_index)?.mask_where(invalid)?;
                Some(discriminator.gt(threshold))
            }
            None => None,
        };

        let summer_value = linear_predictor(
            &index(parameters.summer_index)?.mask_where(invalid)?,
            parameters.summer_slope,
            parameters.summer_intercept,
            parameters.log_linear,
        );
        let fall_value = linear_predictor(
            &index(parameters.fall_index)?.mask_where(invalid)?,
            parameters.fall_slope,
            parameters.fall_intercept,
            parameters.log_linear,
        );

        let (summer_vi, fall_vi) = match &summer_mask {
            Some(summer) => {
                let fall = summer.mapv(|s| !s);
                (summer_value.keep_where(summer, 0.0)?, fall_value.keep_where(&fall, 0.0)?)
            }
            None => (summer_value, fall_value),
        };
        let biomass = &summer_vi + &fall_vi;

        log::debug!(
            "Model {}: {} valid biomass pixels of {:?}",
            model,
            biomass.valid_count(),
            biomass.dim()
        );

        Ok(Self {
            model: model.to_string(),
            parameters: parameters.clone(),
            summer_vi,
            fall_vi,
            biomass,
            summer_mask,
        })
    }

    /// Write `<model>_biomass.tif`, `<model>_summer_vi.tif` and `<model>_fall_vi.tif`
    pub fn export(&self, scene: &Scene, dir: &Path, format: ExportFormat) -> RangesatResult<()> {
        std::fs::create_dir_all(dir)?;
        let layers = [
            ("biomass", &self.biomass),
            ("summer_vi", &self.summer_vi),
            ("fall_vi", &self.fall_vi),
        ];
        for (suffix, grid) in layers {
            let dst = dir.join(format!("{}_{}.tif", self.model, suffix));
            match format {
                ExportFormat::Rounded => scene.dump(&grid.round(), &dst, DEFAULT_NODATA)?,
                ExportFormat::Float32 => scene.dump(grid, &dst, DEFAULT_NODATA)?,
            }
        }
        Ok(())
    }
}

/// `intercept + slope * x`, exponentiated for log-linear models.
/// Linear predictions are floored at zero unless both coefficients are non-positive.
pub fn linear_predictor(x: &MaskedGrid, slope: f64, intercept: f64, log_linear: bool) -> MaskedGrid {
    let value = &(x * slope) + intercept;
    if log_linear {
        value.map(f64::exp)
    } else if slope > 0.0 || intercept > 0.0 {
        value.clip_min(0.0)
    } else {
        value
    }
}

/// Result of evaluating every configured model against one scene
#[derive(Debug, Default)]
pub struct ModelEvaluation {
    pub grids: Vec<BiomassGrid>,
    /// Models that could not be evaluated, with the reason
    pub skipped: Vec<(String, RangesatError)>,
}

/// Evaluate `models` in order. A model lacking parameters or bands for this
/// sensor is skipped; the others still run.
pub fn evaluate_models(scene: &Scene, mask: &QualityMask, models: &[BiomassModel]) -> ModelEvaluation {
    let invalid = mask.composite_invalid();
    let satellite = scene.satellite();
    let mut cache: HashMap<SpectralIndex, MaskedGrid> = HashMap::new();
    let mut evaluation = ModelEvaluation::default();

    for model in models {
        let parameters = match model.parameters_for(satellite) {
            Some(p) => p,
            None => {
                let err = RangesatError::Configuration(format!(
                    "model '{}' has no parameters for Landsat {}",
                    model.name, satellite
                ));
                log::warn!("Skipping model on {}: {}", scene.product_id(), err);
                evaluation.skipped.push((model.name.clone(), err));
                continue;
            }
        };

        let result = BiomassGrid::evaluate(&model.name, parameters, &invalid, |idx| {
            if let Some(grid) = cache.get(&idx) {
                return Ok(grid.clone());
            }
            let grid = scene.index(idx)?;
            cache.insert(idx, grid.clone());
            Ok(grid)
        });

        match result {
            Ok(grid) => evaluation.grids.push(grid),
            Err(err) => {
                log::warn!("Skipping model {} on {}: {}", model.name, scene.product_id(), err);
                evaluation.skipped.push((model.name.clone(), err));
            }
        }
    }

    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Satellite;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn parameters(threshold: Option<f64>) -> SatModelParameters {
        SatModelParameters {
            satellite: Satellite::Landsat8,
            discriminate_index: SpectralIndex::Ndvi,
            discriminate_threshold: threshold,
            summer_index: SpectralIndex::Nbr,
            summer_slope: 100.0,
            summer_intercept: 10.0,
            fall_index: SpectralIndex::Nbr2,
            fall_slope: 50.0,
            fall_intercept: 5.0,
            required_coverage: 0.5,
            minimum_area_ha: 0.0,
            log_linear: false,
        }
    }

    fn indices(idx: SpectralIndex) -> RangesatResult<MaskedGrid> {
        Ok(match idx {
            SpectralIndex::Ndvi => MaskedGrid::from_values(array![[0.6, 0.2], [0.5, 0.1]]),
            SpectralIndex::Nbr => MaskedGrid::from_values(array![[0.4, 0.4], [-0.5, 0.4]]),
            SpectralIndex::Nbr2 => MaskedGrid::from_values(array![[0.2, 0.2], [0.2, 0.2]]),
            other => {
                return Err(RangesatError::MissingBand {
                    band: other.to_string(),
                    satellite: Satellite::Landsat8,
                })
            }
        })
    }

    #[test]
    fn test_summer_fall_split() {
        let invalid = Array2::from_elem((2, 2), false);
        let grid = BiomassGrid::evaluate("herb", &parameters(Some(0.38)), &invalid, indices).unwrap();

        let summer = grid.summer_mask.as_ref().unwrap();
        assert_eq!(summer, &array![[true, false], [true, false]]);

        assert_relative_eq!(grid.summer_vi.get(0, 0).unwrap(), 50.0, epsilon = 1e-9);
        assert_eq!(grid.summer_vi.get(0, 1), Some(0.0));
        // negative summer prediction clips to zero
        assert_eq!(grid.summer_vi.get(1, 0), Some(0.0));

        assert_eq!(grid.fall_vi.get(0, 0), Some(0.0));
        assert_relative_eq!(grid.fall_vi.get(0, 1).unwrap(), 15.0, epsilon = 1e-9);

        assert_relative_eq!(grid.biomass.get(0, 0).unwrap(), 50.0, epsilon = 1e-9);
        assert_relative_eq!(grid.biomass.get(1, 1).unwrap(), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_cells_propagate() {
        let invalid = array![[false, true], [false, false]];
        let grid = BiomassGrid::evaluate("herb", &parameters(Some(0.38)), &invalid, indices).unwrap();
        assert_eq!(grid.biomass.get(0, 1), None);
        assert_eq!(grid.summer_vi.get(0, 1), None);
        assert_eq!(grid.fall_vi.get(0, 1), None);
        assert!(!grid.summer_mask.unwrap()[[0, 1]]);
    }

    #[test]
    fn test_without_discriminator_biomass_is_sum() {
        let invalid = Array2::from_elem((2, 2), false);
        let grid = BiomassGrid::evaluate("herb", &parameters(None), &invalid, indices).unwrap();
        assert!(grid.summer_mask.is_none());
        assert_relative_eq!(grid.biomass.get(0, 0).unwrap(), 50.0 + 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_slope_zero_intercept_is_not_clipped() {
        let x = MaskedGrid::from_values(array![[0.5, -0.5]]);
        let y = linear_predictor(&x, -10.0, 0.0, false);
        assert_eq!(y.get(0, 0), Some(-5.0));
        assert_eq!(y.get(0, 1), Some(5.0));

        let clipped = linear_predictor(&x, 10.0, 0.0, false);
        assert_eq!(clipped.get(0, 1), Some(0.0));
    }

    #[test]
    fn test_log_linear_exponentiates() {
        let x = MaskedGrid::from_values(array![[0.0, 1.0]]);
        let y = linear_predictor(&x, 2.0, 1.0, true);
        assert_relative_eq!(y.get(0, 0).unwrap(), 1f64.exp(), epsilon = 1e-12);
        assert_relative_eq!(y.get(0, 1).unwrap(), 3f64.exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let mut pars = parameters(Some(0.3));
        pars.summer_index = SpectralIndex::Evi;
        let invalid = Array2::from_elem((2, 2), false);
        let result = BiomassGrid::evaluate("herb", &pars, &invalid, indices);
        assert!(matches!(result, Err(RangesatError::MissingBand { .. })));
    }
}
