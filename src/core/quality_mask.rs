use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::masked::MaskedGrid;
use crate::io::scene_reader::{Scene, PIXEL_QA};
use crate::types::{BoolGrid, RangesatError, RangesatResult, Raster};

/// Default aerosol QA threshold; values strictly above it are flagged
pub const DEFAULT_AEROSOL_THRESHOLD: f64 = 101.0;

/// Collection 1 `pixel_qa` bit positions
pub mod qa_bits {
    pub const FILL: u16 = 0;
    pub const CLEAR: u16 = 1;
    pub const WATER: u16 = 2;
    pub const CLOUD_SHADOW: u16 = 3;
    pub const SNOW: u16 = 4;
    pub const CLOUD: u16 = 5;
    pub const CLOUD_CONFIDENCE: u16 = 6;
    pub const CIRRUS_CONFIDENCE: u16 = 8;
}

/// Quality mask configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMaskConfig {
    /// Aerosol QA value above which a pixel is discarded
    pub aerosol_threshold: f64,
}

impl Default for QualityMaskConfig {
    fn default() -> Self {
        Self {
            aerosol_threshold: DEFAULT_AEROSOL_THRESHOLD,
        }
    }
}

/// Unpacked per-pixel quality flags of one scene
#[derive(Debug, Clone)]
pub struct QualityMask {
    pub fill: BoolGrid,
    pub clear: BoolGrid,
    pub water: BoolGrid,
    pub cloud_shadow: BoolGrid,
    pub snow: BoolGrid,
    pub cloud: BoolGrid,
    /// 2-bit level, 0 (none) to 3 (high)
    pub cloud_confidence: Array2<u8>,
    /// 2-bit level, 0 (none) to 3 (high)
    pub cirrus_confidence: Array2<u8>,
    pub aerosol_exceeded: BoolGrid,
}

/// Pixel counts of a quality mask, for logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityStats {
    pub total: usize,
    pub clear: usize,
    pub water: usize,
    pub snow: usize,
    pub aerosol: usize,
    pub valid: usize,
}

impl QualityMask {
    /// Build the mask from a decoded scene's `pixel_qa` and aerosol bands
    pub fn build(scene: &Scene, config: &QualityMaskConfig) -> RangesatResult<Self> {
        let pixel_qa = scene.band(PIXEL_QA)?;
        let aerosol = scene.aerosol()?;
        let mask = Self::from_bands(pixel_qa, &aerosol, config.aerosol_threshold)?;

        let stats = mask.stats();
        log::info!(
            "Quality mask for {}: {}/{} valid pixels ({} water, {} snow, {} aerosol)",
            scene.product_id(),
            stats.valid,
            stats.total,
            stats.water,
            stats.snow,
            stats.aerosol
        );
        Ok(mask)
    }

    /// Build the mask from raw `pixel_qa` values and a masked aerosol grid
    pub fn from_bands(pixel_qa: &Raster, aerosol: &MaskedGrid, aerosol_threshold: f64) -> RangesatResult<Self> {
        if pixel_qa.dim() != aerosol.dim() {
            return Err(RangesatError::Decode(format!(
                "pixel_qa shape {:?} differs from aerosol band {:?}",
                pixel_qa.dim(),
                aerosol.dim()
            )));
        }

        let words = decode_qa_words(pixel_qa)?;
        let bit = |position: u16| words.mapv(|w| (w >> position) & 1 == 1);
        let level = |position: u16| words.mapv(|w| ((w >> position) & 0b11) as u8);

        Ok(Self {
            fill: bit(qa_bits::FILL),
            clear: bit(qa_bits::CLEAR),
            water: bit(qa_bits::WATER),
            cloud_shadow: bit(qa_bits::CLOUD_SHADOW),
            snow: bit(qa_bits::SNOW),
            cloud: bit(qa_bits::CLOUD),
            cloud_confidence: level(qa_bits::CLOUD_CONFIDENCE),
            cirrus_confidence: level(qa_bits::CIRRUS_CONFIDENCE),
            aerosol_exceeded: threshold_aerosol(aerosol, aerosol_threshold),
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.clear.dim()
    }

    pub fn not_clear(&self) -> BoolGrid {
        self.clear.mapv(|c| !c)
    }

    /// aerosol exceeded OR not clear OR snow OR water
    pub fn composite_invalid(&self) -> BoolGrid {
        Zip::from(&self.aerosol_exceeded)
            .and(&self.clear)
            .and(&self.snow)
            .and(&self.water)
            .map_collect(|&aerosol, &clear, &snow, &water| aerosol || !clear || snow || water)
    }

    pub fn valid(&self) -> BoolGrid {
        self.composite_invalid().mapv(|bad| !bad)
    }

    pub fn stats(&self) -> QualityStats {
        let count = |g: &BoolGrid| g.iter().filter(|&&v| v).count();
        QualityStats {
            total: self.clear.len(),
            clear: count(&self.clear),
            water: count(&self.water),
            snow: count(&self.snow),
            aerosol: count(&self.aerosol_exceeded),
            valid: count(&self.valid()),
        }
    }
}

/// Flags pixels whose valid aerosol value exceeds `threshold`.
/// Invalid aerosol cells are never flagged.
pub fn threshold_aerosol(aerosol: &MaskedGrid, threshold: f64) -> BoolGrid {
    aerosol.gt(threshold)
}

fn decode_qa_words(pixel_qa: &Raster) -> RangesatResult<Array2<u16>> {
    let mut words = Array2::<u16>::zeros(pixel_qa.dim());
    let mut bad: Option<f64> = None;
    Zip::from(&mut words).and(pixel_qa).for_each(|w, &v| {
        if v.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&v) {
            *w = v as u16;
        } else if bad.is_none() {
            bad = Some(v);
        }
    });
    match bad {
        Some(v) => Err(RangesatError::Decode(format!(
            "pixel_qa value {} is not an unsigned 16-bit word",
            v
        ))),
        None => Ok(words),
    }
}
