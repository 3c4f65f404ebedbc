//! Spectral index catalog.
//!
//! Every index is a pure function of calibrated reflectance. Products that ship
//! a precomputed index band (ESPA `sr_ndvi`, `sr_nbr`, ...) are read through
//! [`SpectralIndex::precomputed_band`] by the scene reader instead.

use crate::core::masked::MaskedGrid;
use crate::core::sensor::SpectralBand;
use crate::types::{RangesatError, RangesatResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpectralIndex {
    Ndvi,
    Nbr,
    Nbr2,
    Evi,
    Savi,
    Msavi,
    Ndmi,
    TasseledCapGreenness,
    TasseledCapBrightness,
    TasseledCapWetness,
    Sr,
    Rdvi,
    Mtvii,
    Psri,
    Ci,
    Nci,
    Rci,
    Ndci,
    Satvi,
    Sf,
    Ndii7,
    Ndwi,
    Sti,
    SwirRatio,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 24] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Nbr,
        SpectralIndex::Nbr2,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
        SpectralIndex::Msavi,
        SpectralIndex::Ndmi,
        SpectralIndex::TasseledCapGreenness,
        SpectralIndex::TasseledCapBrightness,
        SpectralIndex::TasseledCapWetness,
        SpectralIndex::Sr,
        SpectralIndex::Rdvi,
        SpectralIndex::Mtvii,
        SpectralIndex::Psri,
        SpectralIndex::Ci,
        SpectralIndex::Nci,
        SpectralIndex::Rci,
        SpectralIndex::Ndci,
        SpectralIndex::Satvi,
        SpectralIndex::Sf,
        SpectralIndex::Ndii7,
        SpectralIndex::Ndwi,
        SpectralIndex::Sti,
        SpectralIndex::SwirRatio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Nbr => "nbr",
            SpectralIndex::Nbr2 => "nbr2",
            SpectralIndex::Evi => "evi",
            SpectralIndex::Savi => "savi",
            SpectralIndex::Msavi => "msavi",
            SpectralIndex::Ndmi => "ndmi",
            SpectralIndex::TasseledCapGreenness => "tasseled_cap_greenness",
            SpectralIndex::TasseledCapBrightness => "tasseled_cap_brightness",
            SpectralIndex::TasseledCapWetness => "tasseled_cap_wetness",
            SpectralIndex::Sr => "sr",
            SpectralIndex::Rdvi => "rdvi",
            SpectralIndex::Mtvii => "mtvii",
            SpectralIndex::Psri => "psri",
            SpectralIndex::Ci => "ci",
            SpectralIndex::Nci => "nci",
            SpectralIndex::Rci => "rci",
            SpectralIndex::Ndci => "ndci",
            SpectralIndex::Satvi => "satvi",
            SpectralIndex::Sf => "sf",
            SpectralIndex::Ndii7 => "ndii7",
            SpectralIndex::Ndwi => "ndwi",
            SpectralIndex::Sti => "sti",
            SpectralIndex::SwirRatio => "swir_ratio",
        }
    }

    /// ESPA precomputed product band, if the index has one
    pub fn precomputed_band(&self) -> Option<&'static str> {
        match self {
            SpectralIndex::Ndvi => Some("sr_ndvi"),
            SpectralIndex::Nbr => Some("sr_nbr"),
            SpectralIndex::Nbr2 => Some("sr_nbr2"),
            SpectralIndex::Evi => Some("sr_evi"),
            SpectralIndex::Savi => Some("sr_savi"),
            SpectralIndex::Msavi => Some("sr_msavi"),
            SpectralIndex::Ndmi => Some("sr_ndmi"),
            _ => None,
        }
    }

    /// Normalized differences are bounded to [-1, 1]
    pub fn is_normalized(&self) -> bool {
        matches!(
            self,
            SpectralIndex::Ndvi
                | SpectralIndex::Nbr
                | SpectralIndex::Nbr2
                | SpectralIndex::Ndmi
                | SpectralIndex::Nci
                | SpectralIndex::Ndci
                | SpectralIndex::Ndii7
                | SpectralIndex::Ndwi
        )
    }

    pub fn required_bands(&self) -> &'static [SpectralBand] {
        use SpectralBand::*;
        match self {
            SpectralIndex::Ndvi | SpectralIndex::Sr | SpectralIndex::Rdvi | SpectralIndex::Savi
            | SpectralIndex::Msavi => &[Red, Nir],
            SpectralIndex::Nbr | SpectralIndex::Ndii7 | SpectralIndex::Sf => &[Nir, Swir2],
            SpectralIndex::Nbr2 | SpectralIndex::Sti | SpectralIndex::SwirRatio => &[Swir1, Swir2],
            SpectralIndex::Ndmi | SpectralIndex::Ndwi => &[Nir, Swir1],
            SpectralIndex::Evi => &[Blue, Red, Nir],
            SpectralIndex::TasseledCapGreenness
            | SpectralIndex::TasseledCapBrightness
            | SpectralIndex::TasseledCapWetness => &[Blue, Green, Red, Nir, Swir1, Swir2],
            SpectralIndex::Mtvii | SpectralIndex::Psri => &[Green, Red, Nir],
            SpectralIndex::Ci | SpectralIndex::Nci => &[Green, Swir1],
            SpectralIndex::Rci | SpectralIndex::Ndci => &[Red, Swir1],
            SpectralIndex::Satvi => &[Red, Swir1, Swir2],
        }
    }

    /// Evaluate the index from calibrated reflectance supplied by `reflectance`
    pub fn compute<F>(&self, mut reflectance: F) -> RangesatResult<MaskedGrid>
    where
        F: FnMut(SpectralBand) -> RangesatResult<MaskedGrid>,
    {
        use SpectralBand::*;
        let grid = match self {
            SpectralIndex::Ndvi => normalized_difference(&reflectance(Nir)?, &reflectance(Red)?),
            SpectralIndex::Nbr => normalized_difference(&reflectance(Nir)?, &reflectance(Swir2)?),
            SpectralIndex::Nbr2 => normalized_difference(&reflectance(Swir1)?, &reflectance(Swir2)?),
            SpectralIndex::Ndmi | SpectralIndex::Ndwi => {
                normalized_difference(&reflectance(Nir)?, &reflectance(Swir1)?)
            }
            SpectralIndex::Evi => {
                let (blue, red, nir) = (reflectance(Blue)?, reflectance(Red)?, reflectance(Nir)?);
                let denom = &(&(&nir + &(6.0 * &red)) - &(7.5 * &blue)) + 1.0;
                &(2.5 * &(&nir - &red)) / &denom
            }
            SpectralIndex::Savi => {
                let (red, nir) = (reflectance(Red)?, reflectance(Nir)?);
                &(1.5 * &(&nir - &red)) / &(&(&nir + &red) + 0.5)
            }
            SpectralIndex::Msavi => {
                let (red, nir) = (reflectance(Red)?, reflectance(Nir)?);
                let a = &(2.0 * &nir) + 1.0;
                let disc = &(&a * &a) - &(8.0 * &(&nir - &red));
                &(&a - &disc.sqrt()) / 2.0
            }
            SpectralIndex::TasseledCapGreenness => tasseled_cap(
                &mut reflectance,
                [-0.2941, -0.2430, -0.5424, 0.7276, 0.0713, -0.1608],
            )?,
            SpectralIndex::TasseledCapBrightness => tasseled_cap(
                &mut reflectance,
                [0.3029, 0.2786, 0.4733, 0.5599, 0.5080, 0.1872],
            )?,
            SpectralIndex::TasseledCapWetness => tasseled_cap(
                &mut reflectance,
                [0.1511, 0.1973, 0.3283, 0.3407, -0.7117, -0.4559],
            )?,
            SpectralIndex::Sr => &reflectance(Nir)? / &reflectance(Red)?,
            SpectralIndex::Rdvi => {
                let (red, nir) = (reflectance(Red)?, reflectance(Nir)?);
                &(&nir - &red) / &(&nir + &red).sqrt()
            }
            SpectralIndex::Mtvii => {
                let (green, red, nir) = (reflectance(Green)?, reflectance(Red)?, reflectance(Nir)?);
                let inner = &(1.2 * &(&nir - &green)) - &(2.5 * &(&red - &green));
                1.2 * &inner
            }
            SpectralIndex::Psri => {
                let (green, red, nir) = (reflectance(Green)?, reflectance(Red)?, reflectance(Nir)?);
                &(&red - &green) / &nir
            }
            SpectralIndex::Ci => &reflectance(Swir1)? - &reflectance(Green)?,
            SpectralIndex::Nci => normalized_difference(&reflectance(Swir1)?, &reflectance(Green)?),
            SpectralIndex::Rci => &reflectance(Swir1)? / &reflectance(Red)?,
            SpectralIndex::Ndci => normalized_difference(&reflectance(Swir1)?, &reflectance(Red)?),
            SpectralIndex::Satvi => {
                let (red, swir1, swir2) = (reflectance(Red)?, reflectance(Swir1)?, reflectance(Swir2)?);
                let soil = &(&(&swir1 - &red) / &(&(&swir1 + &red) + 0.5)) * 1.5;
                &soil - &(&swir2 / 2.0)
            }
            SpectralIndex::Sf => &reflectance(Swir2)? / &reflectance(Nir)?,
            SpectralIndex::Ndii7 => normalized_difference(&reflectance(Nir)?, &reflectance(Swir2)?),
            SpectralIndex::Sti => &reflectance(Swir1)? / &reflectance(Swir2)?,
            SpectralIndex::SwirRatio => &reflectance(Swir2)? / &reflectance(Swir1)?,
        };
        Ok(grid)
    }
}

fn normalized_difference(a: &MaskedGrid, b: &MaskedGrid) -> MaskedGrid {
    &(a - b) / &(a + b)
}

/// Linear combination of blue, green, red, nir, swir1, swir2
fn tasseled_cap<F>(reflectance: &mut F, coefficients: [f64; 6]) -> RangesatResult<MaskedGrid>
where
    F: FnMut(SpectralBand) -> RangesatResult<MaskedGrid>,
{
    use SpectralBand::*;
    let bands = [Blue, Green, Red, Nir, Swir1, Swir2];
    let mut acc: Option<MaskedGrid> = None;
    for (band, coefficient) in bands.iter().zip(coefficients) {
        let term = coefficient * &reflectance(*band)?;
        acc = Some(match acc {
            Some(sum) => &sum + &term,
            None => term,
        });
    }
    acc.ok_or_else(|| RangesatError::Processing("Tasseled cap without bands".to_string()))
}

impl FromStr for SpectralIndex {
    type Err = RangesatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = match key.as_str() {
            "mtvi1" => "mtvii",
            "greenness" => "tasseled_cap_greenness",
            "brightness" => "tasseled_cap_brightness",
            "wetness" => "tasseled_cap_wetness",
            other => other,
        };
        SpectralIndex::ALL
            .iter()
            .find(|idx| idx.name() == key)
            .copied()
            .ok_or_else(|| RangesatError::Configuration(format!("Unknown spectral index '{}'", s)))
    }
}

impl TryFrom<String> for SpectralIndex {
    type Error = RangesatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpectralIndex> for String {
    fn from(value: SpectralIndex) -> Self {
        value.name().to_string()
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
