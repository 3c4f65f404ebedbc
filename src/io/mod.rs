//! Scene, raster and parcel I/O

pub mod geotiff;
pub mod metadata;
pub mod parcels;
pub mod scene_reader;

pub use metadata::{ProductId, SceneMetadata};
pub use parcels::{Parcel, ParcelSet};
pub use scene_reader::{Scene, SceneReader, SceneSummary};
