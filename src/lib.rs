//! RangeSat: Landsat rangeland biomass estimation.
//!
//! Decodes Landsat surface reflectance scenes, masks them with the QA band,
//! evaluates per-sensor summer/fall biomass regressions and reduces the
//! result over pasture polygons into a queryable store.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod store;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{AreaMode, BiomassModel, ExportFormat, LocationConfig, SatModelParameters};
pub use io::{ParcelSet, Scene};
pub use pipeline::{BatchReport, ProcessingContext, ProcessingOptions};
pub use store::{AggFunc, PastureStatRecord, ResultStore, StatsFilter};
pub use types::{BoundingBox, GeoTransform, RangesatError, RangesatResult, Satellite, Wrs};
