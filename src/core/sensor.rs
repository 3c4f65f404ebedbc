//! Per-sensor band designations and reflectance calibration.
//!
//! Each Landsat generation maps the logical spectral bands onto its own
//! surface reflectance file names. Reflectance from TM and ETM+ is harmonised
//! to OLI with the ordinary least squares transformation of
//! Roy et al. (2016), "Characterization of Landsat-7 to Landsat-8 reflective
//! wavelength and normalized difference vegetation index continuity",
//! Remote Sensing of Environment 185, Table 2.

use crate::types::Satellite;

/// Logical reflective band, independent of sensor numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralBand {
    UltraBlue,
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl SpectralBand {
    pub const ALL: [SpectralBand; 7] = [
        SpectralBand::UltraBlue,
        SpectralBand::Blue,
        SpectralBand::Green,
        SpectralBand::Red,
        SpectralBand::Nir,
        SpectralBand::Swir1,
        SpectralBand::Swir2,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for SpectralBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpectralBand::UltraBlue => "ultra_blue",
            SpectralBand::Blue => "blue",
            SpectralBand::Green => "green",
            SpectralBand::Red => "red",
            SpectralBand::Nir => "nir",
            SpectralBand::Swir1 => "swir1",
            SpectralBand::Swir2 => "swir2",
        };
        write!(f, "{}", name)
    }
}

/// Digital number to harmonised reflectance: `slope * (|dn| * scale + offset) + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandCalibration {
    pub scale: f64,
    pub offset: f64,
    pub harmonize_slope: f64,
    pub harmonize_intercept: f64,
}

impl BandCalibration {
    const fn identity() -> Self {
        Self {
            scale: SR_SCALE,
            offset: 0.0,
            harmonize_slope: 1.0,
            harmonize_intercept: 0.0,
        }
    }

    const fn to_oli(intercept: f64, slope: f64) -> Self {
        Self {
            scale: SR_SCALE,
            offset: 0.0,
            harmonize_slope: slope,
            harmonize_intercept: intercept,
        }
    }

    pub fn apply(&self, dn: f64) -> f64 {
        self.harmonize_slope * (dn.abs() * self.scale + self.offset) + self.harmonize_intercept
    }
}

/// Surface reflectance scale factor of the ESPA Collection 1 products
pub const SR_SCALE: f64 = 0.0001;

/// Scale factor of the precomputed spectral index products (sr_ndvi, sr_nbr, ...)
pub const INDEX_PRODUCT_SCALE: f64 = 0.0001;

/// Documented valid range of the surface reflectance digital numbers
pub const SR_VALID_RANGE: (f64, f64) = (-2000.0, 16000.0);

/// Static description of one sensor
#[derive(Debug)]
pub struct SensorProfile {
    pub instrument: &'static str,
    band_names: [Option<&'static str>; 7],
    calibration: [BandCalibration; 7],
    pub aerosol_band: &'static str,
}

impl SensorProfile {
    /// File band name for a logical band, `None` when the sensor lacks it
    pub fn band_name(&self, band: SpectralBand) -> Option<&'static str> {
        self.band_names[band.slot()]
    }

    pub fn calibration(&self, band: SpectralBand) -> &BandCalibration {
        &self.calibration[band.slot()]
    }
}

// TM and ETM+ share band numbering; band 6 is thermal and not delivered as SR.
const TM_BANDS: [Option<&str>; 7] = [
    None,
    Some("sr_band1"),
    Some("sr_band2"),
    Some("sr_band3"),
    Some("sr_band4"),
    Some("sr_band5"),
    Some("sr_band7"),
];

const OLI_BANDS: [Option<&str>; 7] = [
    Some("sr_band1"),
    Some("sr_band2"),
    Some("sr_band3"),
    Some("sr_band4"),
    Some("sr_band5"),
    Some("sr_band6"),
    Some("sr_band7"),
];

const ETM_TO_OLI: [BandCalibration; 7] = [
    BandCalibration::identity(),
    BandCalibration::to_oli(0.0003, 0.8474),
    BandCalibration::to_oli(0.0088, 0.8483),
    BandCalibration::to_oli(0.0061, 0.9047),
    BandCalibration::to_oli(0.0412, 0.8462),
    BandCalibration::to_oli(0.0254, 0.8937),
    BandCalibration::to_oli(0.0172, 0.9071),
];

const OLI_NATIVE: [BandCalibration; 7] = [BandCalibration::identity(); 7];

static TM_PROFILE: SensorProfile = SensorProfile {
    instrument: "TM",
    band_names: TM_BANDS,
    calibration: ETM_TO_OLI,
    aerosol_band: "sr_atmos_opacity",
};

static ETM_PROFILE: SensorProfile = SensorProfile {
    instrument: "ETM+",
    band_names: TM_BANDS,
    calibration: ETM_TO_OLI,
    aerosol_band: "sr_atmos_opacity",
};

static OLI_PROFILE: SensorProfile = SensorProfile {
    instrument: "OLI",
    band_names: OLI_BANDS,
    calibration: OLI_NATIVE,
    aerosol_band: "sr_aerosol",
};

static OLI2_PROFILE: SensorProfile = SensorProfile {
    instrument: "OLI-2",
    band_names: OLI_BANDS,
    calibration: OLI_NATIVE,
    aerosol_band: "sr_aerosol",
};

/// Sensor profile lookup; exhaustive over every supported generation
pub fn sensor_profile(satellite: Satellite) -> &'static SensorProfile {
    match satellite {
        Satellite::Landsat4 | Satellite::Landsat5 => &TM_PROFILE,
        Satellite::Landsat7 => &ETM_PROFILE,
        Satellite::Landsat8 => &OLI_PROFILE,
        Satellite::Landsat9 => &OLI2_PROFILE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_band_designations() {
        let oli = sensor_profile(Satellite::Landsat8);
        assert_eq!(oli.band_name(SpectralBand::Red), Some("sr_band4"));
        assert_eq!(oli.band_name(SpectralBand::Nir), Some("sr_band5"));
        assert_eq!(oli.aerosol_band, "sr_aerosol");

        let etm = sensor_profile(Satellite::Landsat7);
        assert_eq!(etm.band_name(SpectralBand::Red), Some("sr_band3"));
        assert_eq!(etm.band_name(SpectralBand::Swir2), Some("sr_band7"));
        assert_eq!(etm.band_name(SpectralBand::UltraBlue), None);

        let tm = sensor_profile(Satellite::Landsat5);
        assert_eq!(tm.band_name(SpectralBand::Nir), Some("sr_band4"));
        assert_eq!(tm.aerosol_band, "sr_atmos_opacity");
    }

    #[test]
    fn test_every_sensor_has_core_bands() {
        for sat in Satellite::ALL {
            let profile = sensor_profile(sat);
            for band in [SpectralBand::Red, SpectralBand::Nir, SpectralBand::Swir1, SpectralBand::Swir2] {
                assert!(profile.band_name(band).is_some(), "{:?} lacks {}", sat, band);
            }
        }
    }

    #[test]
    fn test_calibration_harmonises_etm_to_oli() {
        let oli = sensor_profile(Satellite::Landsat8).calibration(SpectralBand::Nir);
        assert_relative_eq!(oli.apply(3000.0), 0.3, epsilon = 1e-12);
        assert_relative_eq!(oli.apply(-3000.0), 0.3, epsilon = 1e-12);

        let etm = sensor_profile(Satellite::Landsat7).calibration(SpectralBand::Nir);
        assert_relative_eq!(etm.apply(3000.0), 0.0412 + 0.8462 * 0.3, epsilon = 1e-12);
    }
}
