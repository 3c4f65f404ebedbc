use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued raster band as read from disk
pub type Raster = Array2<f64>;

/// Boolean per-pixel grid (masks, parcel footprints)
pub type BoolGrid = Array2<bool>;

/// Default nodata sentinel for exported rasters
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Landsat sensor generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Satellite {
    Landsat4,
    Landsat5,
    Landsat7,
    Landsat8,
    Landsat9,
}

impl Satellite {
    pub const ALL: [Satellite; 5] = [
        Satellite::Landsat4,
        Satellite::Landsat5,
        Satellite::Landsat7,
        Satellite::Landsat8,
        Satellite::Landsat9,
    ];

    /// Map the integer generation (as written in product ids and configs)
    pub fn from_generation(generation: u8) -> RangesatResult<Self> {
        match generation {
            4 => Ok(Satellite::Landsat4),
            5 => Ok(Satellite::Landsat5),
            7 => Ok(Satellite::Landsat7),
            8 => Ok(Satellite::Landsat8),
            9 => Ok(Satellite::Landsat9),
            other => Err(RangesatError::Decode(format!(
                "Unsupported Landsat generation: {}",
                other
            ))),
        }
    }

    pub fn generation(&self) -> u8 {
        match self {
            Satellite::Landsat4 => 4,
            Satellite::Landsat5 => 5,
            Satellite::Landsat7 => 7,
            Satellite::Landsat8 => 8,
            Satellite::Landsat9 => 9,
        }
    }

    /// OLI and OLI-2 carry the coastal aerosol band and the `sr_aerosol` QA layer
    pub fn is_oli(&self) -> bool {
        matches!(self, Satellite::Landsat8 | Satellite::Landsat9)
    }
}

impl TryFrom<u8> for Satellite {
    type Error = RangesatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Satellite::from_generation(value)
    }
}

impl From<Satellite> for u8 {
    fn from(value: Satellite) -> Self {
        value.generation()
    }
}

impl std::fmt::Display for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.generation())
    }
}

/// Worldwide Reference System path/row of a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wrs {
    pub path: u16,
    pub row: u16,
}

impl std::fmt::Display for Wrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}{:03}", self.path, self.row)
    }
}

/// Axis-aligned bounding box `[left, bottom, right, top]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BoundingBox {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.left, self.bottom, self.right, self.top]
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Strict overlap test; boxes that only share an edge do not intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.left.max(other.left) < self.right.min(other.right)
            && self.bottom.max(other.bottom) < self.top.min(other.top)
    }

    /// True when `self` lies entirely inside `other`
    pub fn within(&self, other: &BoundingBox) -> bool {
        self.left >= other.left
            && self.bottom >= other.bottom
            && self.right <= other.right
            && self.top <= other.top
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.left, self.bottom, self.right, self.top)
    }
}

/// Affine geotransform in GDAL order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, cellsize: f64) -> Self {
        Self::from_gdal([top_left_x, cellsize, 0.0, top_left_y, 0.0, -cellsize])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_height < 0.0
    }

    /// Transform of a sub-window starting at (`row_off`, `col_off`)
    pub fn window_transform(&self, row_off: usize, col_off: usize) -> GeoTransform {
        GeoTransform {
            top_left_x: self.top_left_x + col_off as f64 * self.pixel_width,
            top_left_y: self.top_left_y + row_off as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Map coordinates of the center of pixel (`row`, `col`)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (col, row) of a map coordinate for north-up grids
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    /// Extent of a `rows` x `cols` grid
    pub fn bounds(&self, rows: usize, cols: usize) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox {
            left: x0.min(x1),
            bottom: y0.min(y1),
            right: x0.max(x1),
            top: y0.max(y1),
        }
    }
}

/// Error types for scene processing
#[derive(Debug, thiserror::Error)]
pub enum RangesatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Scene decode error: {0}")]
    Decode(String),

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Band '{band}' is not available for Landsat {satellite}")]
    MissingBand { band: String, satellite: Satellite },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Result store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for scene processing operations
pub type RangesatResult<T> = Result<T, RangesatError>;
