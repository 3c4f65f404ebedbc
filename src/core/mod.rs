//! Core processing modules: masks, indices, models and zonal statistics

pub mod biomass_model;
pub mod indices;
pub mod masked;
pub mod quality_mask;
pub mod rasterize;
pub mod sensor;
pub mod statistics;
pub mod zonal_stats;

// Re-export main types
pub use biomass_model::{evaluate_models, BiomassGrid, ModelEvaluation};
pub use indices::SpectralIndex;
pub use masked::MaskedGrid;
pub use quality_mask::{QualityMask, QualityMaskConfig};
pub use sensor::SpectralBand;
pub use zonal_stats::analyze;
