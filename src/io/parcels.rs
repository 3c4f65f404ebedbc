//! Parcel (pasture) polygons loaded from an OGR vector source.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use gdal_sys::OGRwkbGeometryType;

use crate::core::rasterize::{Polygon, Ring};
use crate::types::{BoundingBox, RangesatError, RangesatResult};

/// One pasture polygon set, keyed `<pasture><delimiter><ranch>`
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub key: String,
    pub pasture: String,
    pub ranch: String,
    pub polygons: Vec<Polygon>,
    /// Area attribute in hectares, when the source carries one
    pub area_ha: Option<f64>,
}

impl Parcel {
    pub fn from_key(key: &str, delimiter: &str, polygons: Vec<Polygon>, area_ha: Option<f64>) -> RangesatResult<Self> {
        let (pasture, ranch) = split_key(key, delimiter)?;
        Ok(Self {
            key: key.to_string(),
            pasture,
            ranch,
            polygons,
            area_ha,
        })
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.polygons
            .iter()
            .filter_map(Polygon::bounds)
            .reduce(|a, b| a.union(&b))
    }

    pub fn matches(&self, ranch: &str, pasture: &str) -> bool {
        normalize_name(&self.ranch) == normalize_name(ranch)
            && normalize_name(&self.pasture) == normalize_name(pasture)
    }
}

/// Split `<pasture><delimiter><ranch>`; underscores in keys read as spaces
pub fn split_key(key: &str, delimiter: &str) -> RangesatResult<(String, String)> {
    let mut parts = key.splitn(2, delimiter);
    match (parts.next(), parts.next()) {
        (Some(pasture), Some(ranch)) if !pasture.trim().is_empty() && !ranch.trim().is_empty() => Ok((
            pasture.trim().replace('_', " "),
            ranch.trim().replace('_', " "),
        )),
        _ => Err(RangesatError::Configuration(format!(
            "parcel key '{}' is not of the form <pasture>{}<ranch>",
            key, delimiter
        ))),
    }
}

/// Case-insensitive comparison form; `_` and space are equivalent
pub fn normalize_name(name: &str) -> String {
    name.trim().replace('_', " ").to_lowercase()
}

/// All parcels of a location in one CRS
#[derive(Debug, Clone, Default)]
pub struct ParcelSet {
    pub parcels: Vec<Parcel>,
    /// WKT of the polygon coordinates; empty when undeclared
    pub crs_wkt: String,
}

impl ParcelSet {
    pub fn new(parcels: Vec<Parcel>, crs_wkt: String) -> RangesatResult<Self> {
        let mut seen = HashSet::new();
        for parcel in &parcels {
            let id = (normalize_name(&parcel.ranch), normalize_name(&parcel.pasture));
            if !seen.insert(id) {
                return Err(RangesatError::Configuration(format!(
                    "duplicate pasture '{}' in ranch '{}'",
                    parcel.pasture, parcel.ranch
                )));
            }
        }
        Ok(Self { parcels, crs_wkt })
    }

    /// Load every feature of the first layer of `path`
    pub fn load<P: AsRef<Path>>(
        path: P,
        key_field: &str,
        delimiter: &str,
        area_field: Option<&str>,
    ) -> RangesatResult<Self> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)?;
        let mut layer = dataset.layer(0)?;
        let crs_wkt = match layer.spatial_ref() {
            Some(srs) => srs.to_wkt()?,
            None => {
                log::warn!("{} declares no CRS; coordinates are used as is", path.display());
                String::new()
            }
        };

        let mut parcels = Vec::new();
        for feature in layer.features() {
            let key = feature.field_as_string_by_name(key_field)?.ok_or_else(|| {
                RangesatError::Configuration(format!(
                    "feature without '{}' property in {}",
                    key_field,
                    path.display()
                ))
            })?;
            let area_ha = match area_field {
                Some(field) => feature.field_as_double_by_name(field)?,
                None => None,
            };
            let polygons = match feature.geometry() {
                Some(geometry) => polygons_from_geometry(geometry)?,
                None => Vec::new(),
            };
            parcels.push(Parcel::from_key(&key, delimiter, polygons, area_ha)?);
        }

        log::info!("Loaded {} parcels from {}", parcels.len(), path.display());
        Self::new(parcels, crs_wkt)
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn find(&self, ranch: &str, pasture: &str) -> Option<&Parcel> {
        self.parcels.iter().find(|p| p.matches(ranch, pasture))
    }

    /// Ranch name to sorted pasture names
    pub fn ranches(&self) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for parcel in &self.parcels {
            out.entry(parcel.ranch.clone()).or_default().push(parcel.pasture.clone());
        }
        for pastures in out.values_mut() {
            pastures.sort();
        }
        out
    }

    /// Union of all parcel bounds in the source CRS
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.parcels
            .iter()
            .filter_map(Parcel::bounds)
            .reduce(|a, b| a.union(&b))
    }

    /// Study area in WGS84 longitude/latitude
    pub fn wgs_bounds(&self) -> RangesatResult<Option<BoundingBox>> {
        match self.bounds() {
            Some(b) => Ok(Some(transform_bbox(&b, &self.crs_wkt, WGS84)?)),
            None => Ok(None),
        }
    }

    /// Copy with every vertex transformed into `dst_wkt`
    pub fn reprojected(&self, dst_wkt: &str) -> RangesatResult<ParcelSet> {
        if self.crs_wkt.is_empty() || dst_wkt.is_empty() || same_crs(&self.crs_wkt, dst_wkt)? {
            return Ok(self.clone());
        }
        let transform = coord_transform(&self.crs_wkt, dst_wkt)?;
        let mut parcels = self.parcels.clone();
        for parcel in &mut parcels {
            for polygon in &mut parcel.polygons {
                for ring in &mut polygon.rings {
                    transform_ring(&transform, ring)?;
                }
            }
        }
        Ok(ParcelSet {
            parcels,
            crs_wkt: dst_wkt.to_string(),
        })
    }
}

/// Marker for the geographic WGS84 CRS in the transform helpers
pub const WGS84: &str = "EPSG:4326";

fn spatial_ref(definition: &str) -> RangesatResult<SpatialRef> {
    let srs = if definition == WGS84 {
        SpatialRef::from_epsg(4326)?
    } else {
        SpatialRef::from_definition(definition)?
    };
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

fn same_crs(a: &str, b: &str) -> RangesatResult<bool> {
    if a == b {
        return Ok(true);
    }
    Ok(spatial_ref(a)? == spatial_ref(b)?)
}

fn coord_transform(src: &str, dst: &str) -> RangesatResult<CoordTransform> {
    Ok(CoordTransform::new(&spatial_ref(src)?, &spatial_ref(dst)?)?)
}

fn transform_ring(transform: &CoordTransform, ring: &mut Ring) -> RangesatResult<()> {
    let mut xs: Vec<f64> = ring.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = ring.iter().map(|p| p.1).collect();
    let mut zs = vec![0.0; ring.len()];
    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
    for (point, (x, y)) in ring.iter_mut().zip(xs.into_iter().zip(ys)) {
        *point = (x, y);
    }
    Ok(())
}

/// Transform a bounding box between two CRS definitions (WKT or `EPSG:4326`).
/// Edges are densified so curved boundaries stay enclosed. An empty
/// definition on either side leaves the box unchanged.
pub fn transform_bbox(bbox: &BoundingBox, src: &str, dst: &str) -> RangesatResult<BoundingBox> {
    if src.is_empty() || dst.is_empty() || same_crs(src, dst)? {
        return Ok(*bbox);
    }
    let transform = coord_transform(src, dst)?;
    let out = transform.transform_bounds(&bbox.as_array(), 21)?;
    Ok(BoundingBox::new(out[0], out[1], out[2], out[3]))
}

fn flat_geometry_type(geometry: &Geometry) -> u32 {
    (geometry.geometry_type() & 0x7fff_ffff) % 1000
}

/// Polygons of a Polygon or MultiPolygon geometry; other types are rejected
pub fn polygons_from_geometry(geometry: &Geometry) -> RangesatResult<Vec<Polygon>> {
    let kind = flat_geometry_type(geometry);
    if kind == OGRwkbGeometryType::wkbPolygon {
        Ok(vec![polygon_rings(geometry)])
    } else if kind == OGRwkbGeometryType::wkbMultiPolygon {
        Ok((0..geometry.geometry_count())
            .map(|i| polygon_rings(&geometry.get_geometry(i)))
            .collect())
    } else {
        Err(RangesatError::Configuration(format!(
            "unsupported parcel geometry type {}",
            geometry.geometry_name()
        )))
    }
}

fn polygon_rings(polygon: &Geometry) -> Polygon {
    let rings = (0..polygon.geometry_count())
        .map(|i| {
            polygon
                .get_geometry(i)
                .get_point_vec()
                .into_iter()
                .map(|(x, y, _)| (x, y))
                .collect()
        })
        .collect();
    Polygon::new(rings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64) -> Polygon {
        Polygon::rectangle(&BoundingBox::new(x, y, x + 100.0, y + 100.0))
    }

    #[test]
    fn test_split_key() {
        assert_eq!(
            split_key("North_Field+Ranch A", "+").unwrap(),
            ("North Field".to_string(), "Ranch A".to_string())
        );
        assert!(split_key("NoDelimiter", "+").is_err());
        assert!(split_key("+Ranch", "+").is_err());
    }

    #[test]
    fn test_name_matching_ignores_case_and_underscores() {
        let parcel = Parcel::from_key("North Field+Ranch A", "+", vec![square(0.0, 0.0)], None).unwrap();
        assert!(parcel.matches("ranch_a", "NORTH_FIELD"));
        assert!(!parcel.matches("ranch b", "north field"));
        assert_eq!(parcel.key, "North Field+Ranch A");
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let a = Parcel::from_key("North+Ranch", "+", vec![square(0.0, 0.0)], None).unwrap();
        let b = Parcel::from_key("north+RANCH", "+", vec![square(200.0, 0.0)], None).unwrap();
        assert!(matches!(
            ParcelSet::new(vec![a.clone(), b], String::new()),
            Err(RangesatError::Configuration(_))
        ));

        let c = Parcel::from_key("North+Other", "+", vec![square(200.0, 0.0)], None).unwrap();
        let set = ParcelSet::new(vec![a, c], String::new()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.ranches().len(), 2);
    }

    #[test]
    fn test_bounds_union_without_crs() {
        let a = Parcel::from_key("A+R", "+", vec![square(0.0, 0.0)], None).unwrap();
        let b = Parcel::from_key("B+R", "+", vec![square(200.0, 50.0)], None).unwrap();
        let set = ParcelSet::new(vec![a, b], String::new()).unwrap();
        let expected = BoundingBox::new(0.0, 0.0, 300.0, 150.0);
        assert_eq!(set.bounds(), Some(expected));
        // no declared CRS: coordinates pass through untouched
        assert_eq!(set.wgs_bounds().unwrap(), Some(expected));
        assert_eq!(set.ranches()["R"], vec!["A".to_string(), "B".to_string()]);
    }
}
