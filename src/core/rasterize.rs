//! Polygon to pixel inclusion mask.
//!
//! Polygons are burned through GDAL's rasterizer into an in-memory dataset on
//! the target grid. A pixel belongs to a polygon when its center lies inside,
//! and interior rings carve holes. Coordinates must already be in the raster's
//! CRS.

use gdal::raster::{rasterize as burn, RasterizeOptions};
use gdal::vector::Geometry;
use gdal::DriverManager;
use ndarray::Array2;

use crate::types::{BoolGrid, BoundingBox, GeoTransform, RangesatError, RangesatResult};

pub type Ring = Vec<(f64, f64)>;

/// One polygon: exterior ring first, then holes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub rings: Vec<Ring>,
}

impl Polygon {
    pub fn new(rings: Vec<Ring>) -> Self {
        Self { rings }
    }

    /// Axis-aligned rectangle, handy for tests and clip windows
    pub fn rectangle(bbox: &BoundingBox) -> Self {
        Self::new(vec![vec![
            (bbox.left, bbox.bottom),
            (bbox.right, bbox.bottom),
            (bbox.right, bbox.top),
            (bbox.left, bbox.top),
            (bbox.left, bbox.bottom),
        ]])
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut points = self.rings.iter().flatten();
        let &(x0, y0) = points.next()?;
        let mut bbox = BoundingBox::new(x0, y0, x0, y0);
        for &(x, y) in points {
            bbox.left = bbox.left.min(x);
            bbox.right = bbox.right.max(x);
            bbox.bottom = bbox.bottom.min(y);
            bbox.top = bbox.top.max(y);
        }
        Some(bbox)
    }

    /// Shoelace area of the exterior minus the holes
    pub fn area(&self) -> f64 {
        let ring_area = |ring: &Ring| {
            let n = ring.len();
            if n < 3 {
                return 0.0;
            }
            let twice: f64 = (0..n)
                .map(|i| {
                    let (x1, y1) = ring[i];
                    let (x2, y2) = ring[(i + 1) % n];
                    x1 * y2 - x2 * y1
                })
                .sum();
            twice.abs() / 2.0
        };
        let mut rings = self.rings.iter();
        let exterior = rings.next().map(ring_area).unwrap_or(0.0);
        exterior - rings.map(ring_area).sum::<f64>()
    }
}

impl Polygon {
    /// OGR polygon built from the WKT of the rings. Unclosed rings are
    /// closed and rings with fewer than three vertices are dropped.
    pub fn to_geometry(&self) -> RangesatResult<Option<Geometry>> {
        let rings: Vec<String> = self
            .rings
            .iter()
            .filter(|ring| ring.len() >= 3)
            .map(|ring| {
                let mut points: Vec<String> = ring.iter().map(|(x, y)| format!("{} {}", x, y)).collect();
                if ring.first() != ring.last() {
                    points.push(format!("{} {}", ring[0].0, ring[0].1));
                }
                format!("({})", points.join(", "))
            })
            .collect();
        if rings.is_empty() {
            return Ok(None);
        }
        let wkt = format!("POLYGON ({})", rings.join(", "));
        Ok(Some(Geometry::from_wkt(&wkt)?))
    }
}

/// Rasterize `polygons` onto a `shape` grid with transform `transform`.
/// The result is the union of the polygons' inclusion masks.
pub fn rasterize(polygons: &[Polygon], transform: &GeoTransform, shape: (usize, usize)) -> RangesatResult<BoolGrid> {
    if !transform.is_north_up() || transform.pixel_width <= 0.0 {
        return Err(RangesatError::GeometryMismatch(
            "Rasterization requires a north-up grid without rotation".to_string(),
        ));
    }

    let (rows, cols) = shape;
    let grid_bounds = transform.bounds(rows, cols);
    let mut geometries = Vec::with_capacity(polygons.len());
    for polygon in polygons {
        let touches_grid = polygon.bounds().map_or(false, |b| b.intersects(&grid_bounds));
        if !touches_grid {
            continue;
        }
        if let Some(geometry) = polygon.to_geometry()? {
            geometries.push(geometry);
        }
    }
    if geometries.is_empty() || rows == 0 || cols == 0 {
        return Ok(Array2::from_elem(shape, false));
    }

    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<u8, _>("", cols as isize, rows as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;

    let burn_values = vec![1.0; geometries.len()];
    burn(
        &mut dataset,
        &[1],
        &geometries,
        &burn_values,
        Some(RasterizeOptions::default()),
    )?;

    let buffer = dataset
        .rasterband(1)?
        .read_as::<u8>((0, 0), (cols, rows), (cols, rows), None)?;
    let burned = Array2::from_shape_vec(shape, buffer.data)
        .map_err(|e| RangesatError::Processing(format!("Rasterized buffer has the wrong shape: {}", e)))?;

    log::debug!(
        "Rasterized {} polygons onto {}x{} grid",
        geometries.len(),
        rows,
        cols
    );
    Ok(burned.mapv(|v| v != 0))
}
