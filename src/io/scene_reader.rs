//! Landsat surface reflectance scene decoder.
//!
//! A scene is a directory (or zip archive) of `<product_id>_<band>.tif`
//! rasters plus the `<product_id>.xml` metadata document. Bands are
//! co-registered onto one grid when they are read.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::core::indices::SpectralIndex;
use crate::core::masked::MaskedGrid;
use crate::core::sensor::{sensor_profile, SpectralBand, INDEX_PRODUCT_SCALE, SR_SCALE, SR_VALID_RANGE};
use crate::io::geotiff::{self, RasterLayer, SampleType};
use crate::io::metadata::{parse_scene_metadata, split_band_file_name, ProductId, SceneMetadata};
use crate::io::parcels::{transform_bbox, WGS84};
use crate::types::{BoundingBox, GeoTransform, RangesatError, RangesatResult, Raster, Satellite, Wrs};

/// QA band every scene must carry
pub const PIXEL_QA: &str = "pixel_qa";

/// Integer pixel window `[row_off, row_off + rows) x [col_off, col_off + cols)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl PixelWindow {
    pub fn full(shape: (usize, usize)) -> Self {
        Self {
            row_off: 0,
            col_off: 0,
            rows: shape.0,
            cols: shape.1,
        }
    }
}

/// Pixel window of a north-up `shape` grid covering `bbox` (grid CRS).
///
/// Offsets are floored and far edges ceiled so the window encloses the box,
/// then intersected with the raster extent.
pub fn bbox_window(transform: &GeoTransform, shape: (usize, usize), bbox: &BoundingBox) -> RangesatResult<PixelWindow> {
    const EPS: f64 = 1e-9;
    let (rows, cols) = shape;
    let (c0, r0) = transform.to_pixel(bbox.left, bbox.top);
    let (c1, r1) = transform.to_pixel(bbox.right, bbox.bottom);

    let col_start = (c0.min(c1) + EPS).floor().max(0.0);
    let col_end = (c0.max(c1) - EPS).ceil().min(cols as f64);
    let row_start = (r0.min(r1) + EPS).floor().max(0.0);
    let row_end = (r0.max(r1) - EPS).ceil().min(rows as f64);

    if !(col_end > col_start && row_end > row_start) {
        return Err(RangesatError::GeometryMismatch(format!(
            "bounding box {} does not overlap the raster extent {}",
            bbox,
            transform.bounds(rows, cols)
        )));
    }

    Ok(PixelWindow {
        row_off: row_start as usize,
        col_off: col_start as usize,
        rows: (row_end - row_start) as usize,
        cols: (col_end - col_start) as usize,
    })
}

/// Grid of one band file as read from its header
#[derive(Debug, Clone, PartialEq)]
pub struct GridHeader {
    pub transform: GeoTransform,
    pub shape: (usize, usize),
}

/// Shared grid of several bands and each band's offset into it
#[derive(Debug, Clone, PartialEq)]
pub struct CommonGrid {
    pub transform: GeoTransform,
    pub shape: (usize, usize),
    /// `(row_off, col_off)` of the common grid inside each band
    pub offsets: Vec<(usize, usize)>,
}

/// Co-register bands with identical pixel size by cropping to their common window
pub fn co_register(headers: &[GridHeader]) -> RangesatResult<CommonGrid> {
    const TOLERANCE: f64 = 1e-6;
    let first = headers
        .first()
        .ok_or_else(|| RangesatError::Decode("no bands to co-register".to_string()))?;
    let pw = first.transform.pixel_width;
    let ph = first.transform.pixel_height;

    for h in headers {
        if !h.transform.is_north_up() {
            return Err(RangesatError::Decode("rotated band grids are not supported".to_string()));
        }
        if (h.transform.pixel_width - pw).abs() > TOLERANCE * pw.abs()
            || (h.transform.pixel_height - ph).abs() > TOLERANCE * ph.abs()
        {
            return Err(RangesatError::Decode(format!(
                "band pixel sizes differ: {}x{} vs {}x{}",
                pw, ph, h.transform.pixel_width, h.transform.pixel_height
            )));
        }
    }

    let mut extent = first.transform.bounds(first.shape.0, first.shape.1);
    for h in &headers[1..] {
        let b = h.transform.bounds(h.shape.0, h.shape.1);
        extent = BoundingBox::new(
            extent.left.max(b.left),
            extent.bottom.max(b.bottom),
            extent.right.min(b.right),
            extent.top.min(b.top),
        );
    }

    let cols = (extent.width() / pw.abs()).round();
    let rows = (extent.height() / ph.abs()).round();
    if cols < 1.0 || rows < 1.0 {
        return Err(RangesatError::Decode("bands do not overlap".to_string()));
    }

    let mut offsets = Vec::with_capacity(headers.len());
    for h in headers {
        let col = (extent.left - h.transform.top_left_x) / pw;
        let row = (extent.top - h.transform.top_left_y) / ph;
        if (col - col.round()).abs() > TOLERANCE || (row - row.round()).abs() > TOLERANCE {
            return Err(RangesatError::Decode(
                "band grids are not pixel aligned".to_string(),
            ));
        }
        offsets.push((row.round() as usize, col.round() as usize));
    }

    Ok(CommonGrid {
        transform: GeoTransform::north_up(extent.left, extent.top, pw),
        shape: (rows as usize, cols as usize),
        offsets,
    })
}

/// Band files of one scene on disk; nothing is read until asked
pub struct SceneReader {
    product_id: ProductId,
    band_paths: BTreeMap<String, PathBuf>,
    metadata_xml: String,
    source: PathBuf,
    _extracted: Option<TempDir>,
}

impl SceneReader {
    /// Discover a scene directory or zip archive
    pub fn open<P: AsRef<Path>>(path: P) -> RangesatResult<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_directory(path, path.to_path_buf(), None)
        } else if path.is_file() && has_extension(path, "zip") {
            let workdir = extract_zip(path)?;
            let dir = workdir.path().to_path_buf();
            Self::from_directory(&dir, path.to_path_buf(), Some(workdir))
        } else {
            Err(unsupported_source(path))
        }
    }

    fn from_directory(dir: &Path, source: PathBuf, extracted: Option<TempDir>) -> RangesatResult<Self> {
        let mut tifs: Vec<(String, String, PathBuf)> = Vec::new();
        let mut xmls: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            if let Some((pid, band)) = split_band_file_name(&name) {
                tifs.push((pid, band, path));
            } else if has_extension(&path, "xml") {
                xmls.push(path);
            }
        }
        tifs.sort();

        let first = tifs
            .first()
            .ok_or_else(|| RangesatError::Decode(format!("no band rasters in {}", source.display())))?;
        let product_id: ProductId = first.0.parse()?;

        let mut band_paths = BTreeMap::new();
        for (pid, band, path) in tifs {
            if pid == product_id.id {
                band_paths.insert(band, path);
            } else {
                log::warn!("Ignoring {} (belongs to {})", path.display(), pid);
            }
        }
        if !band_paths.contains_key(PIXEL_QA) {
            return Err(RangesatError::Decode(format!(
                "{} has no {} band",
                product_id, PIXEL_QA
            )));
        }

        let expected_xml = format!("{}.xml", product_id.id);
        let xml_path = xmls
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(expected_xml.as_str()))
            .or_else(|| xmls.first())
            .ok_or_else(|| RangesatError::Decode(format!("{} has no metadata XML", product_id)))?;
        let metadata_xml = std::fs::read_to_string(xml_path)?;

        log::debug!("Discovered {} with {} bands", product_id, band_paths.len());
        Ok(Self {
            product_id,
            band_paths,
            metadata_xml,
            source,
            _extracted: extracted,
        })
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.band_paths.keys().map(String::as_str).collect()
    }

    /// Co-registered grid of every band, from headers only
    pub fn common_grid(&self) -> RangesatResult<(CommonGrid, String)> {
        let mut headers = Vec::with_capacity(self.band_paths.len());
        let mut crs: Option<String> = None;
        for (band, path) in &self.band_paths {
            let (transform, shape, wkt) = geotiff::read_header(path)?;
            match &crs {
                None => crs = Some(wkt),
                Some(first) if !first.is_empty() && !wkt.is_empty() && first != &wkt => {
                    return Err(RangesatError::Decode(format!(
                        "band {} of {} has a different CRS",
                        band, self.product_id
                    )));
                }
                _ => {}
            }
            headers.push(GridHeader { transform, shape });
        }
        Ok((co_register(&headers)?, crs.unwrap_or_default()))
    }

    /// Decode every band
    pub fn read(&self) -> RangesatResult<Scene> {
        self.read_bands(None, None)
    }

    /// Decode the part of the scene covering `bbox_wgs`, keeping only `bands`
    /// (all bands when `None`). `pixel_qa` is always kept.
    pub fn read_clipped(&self, bbox_wgs: &BoundingBox, bands: Option<&[&str]>) -> RangesatResult<Scene> {
        self.read_bands(Some(bbox_wgs), bands)
    }

    fn read_bands(&self, bbox_wgs: Option<&BoundingBox>, keep: Option<&[&str]>) -> RangesatResult<Scene> {
        let (grid, crs_wkt) = self.common_grid()?;
        let window = match bbox_wgs {
            Some(bbox) => {
                let local = transform_bbox(bbox, WGS84, &crs_wkt)?;
                bbox_window(&grid.transform, grid.shape, &local)?
            }
            None => PixelWindow::full(grid.shape),
        };
        log::debug!("{}: reading window {:?} of {:?}", self.product_id, window, grid.shape);

        let metadata = parse_scene_metadata(&self.metadata_xml)?;
        let mut layers = Vec::new();
        for ((band, path), (row_off, col_off)) in self.band_paths.iter().zip(&grid.offsets) {
            let wanted = band == PIXEL_QA || keep.map_or(true, |k| k.contains(&band.as_str()));
            if !wanted {
                continue;
            }
            let layer = geotiff::read_band_window(
                path,
                (row_off + window.row_off, col_off + window.col_off),
                (window.rows, window.cols),
            )?;
            let nodata = layer
                .nodata
                .or_else(|| metadata.band(band).and_then(|b| b.fill_value));
            layers.push((band.clone(), layer.data, nodata));
        }

        let transform = grid.transform.window_transform(window.row_off, window.col_off);
        let mut scene = Scene::from_parts(self.product_id.clone(), transform, crs_wkt, layers)?;
        scene.metadata = metadata;
        scene.metadata_xml = Some(self.metadata_xml.clone());
        scene.source = Some(self.source.clone());

        log::info!(
            "Decoded {} ({} bands, {}x{})",
            scene.product_id(),
            scene.bands.len(),
            scene.shape.0,
            scene.shape.1
        );
        Ok(scene)
    }
}

fn unsupported_source(path: &Path) -> RangesatError {
    if !path.exists() {
        RangesatError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("scene not found: {}", path.display()),
        ))
    } else {
        RangesatError::Decode(format!(
            "unsupported scene source {} (expected a directory or .zip)",
            path.display()
        ))
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

fn is_pixel_qa_file(name: &str) -> bool {
    split_band_file_name(name).map_or(false, |(_, band)| band == PIXEL_QA)
}

/// GDAL path of the `pixel_qa` raster. Archive members are addressed through
/// `/vsizip/` so only the central directory is read.
fn pixel_qa_source(path: &Path) -> RangesatResult<PathBuf> {
    let names_pixel_qa = |p: &Path| p.file_name().and_then(|n| n.to_str()).map_or(false, is_pixel_qa_file);
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?.path();
            if names_pixel_qa(&entry) {
                return Ok(entry);
            }
        }
    } else if path.is_file() && has_extension(path, "zip") {
        let archive = ZipArchive::new(File::open(path)?)
            .map_err(|e| RangesatError::Decode(format!("Failed to open ZIP {}: {}", path.display(), e)))?;
        if let Some(member) = archive.file_names().find(|name| names_pixel_qa(Path::new(name))) {
            let archive_path = path.canonicalize()?;
            return Ok(PathBuf::from(format!("/vsizip/{}/{}", archive_path.display(), member)));
        };
    } else {
        return Err(unsupported_source(path));
    }
    Err(RangesatError::Decode(format!("{} has no {} band", path.display(), PIXEL_QA)))
}

/// Extract the `.tif` and `.xml` members of an archive into a temporary directory
fn extract_zip(path: &Path) -> RangesatResult<TempDir> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| RangesatError::Decode(format!("Failed to open ZIP {}: {}", path.display(), e)))?;
    let workdir = tempfile::tempdir()?;

    for i in 0..archive.len() {
        let mut member = archive.by_index(i).map_err(|e| {
            RangesatError::Decode(format!("Failed to access member {} of {}: {}", i, path.display(), e))
        })?;
        if member.is_dir() {
            continue;
        }
        let name = match member.enclosed_name().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".tif") || lower.ends_with(".xml")) {
            continue;
        }
        let mut out = File::create(workdir.path().join(&name))?;
        std::io::copy(&mut member, &mut out)?;
    }

    log::debug!("Extracted {} to {}", path.display(), workdir.path().display());
    Ok(workdir)
}

/// Scene metadata carried in every pasture record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub product_id: String,
    pub satellite: Satellite,
    pub acquisition_date: NaiveDate,
    pub wrs: Wrs,
    pub bounds: BoundingBox,
    pub wgs_bounds: Option<BoundingBox>,
}

/// A decoded scene: co-registered bands on one grid. Read-only once built.
#[derive(Debug, Clone)]
pub struct Scene {
    product: ProductId,
    bands: HashMap<String, Raster>,
    nodata: HashMap<String, Option<f64>>,
    transform: GeoTransform,
    crs_wkt: String,
    shape: (usize, usize),
    metadata: SceneMetadata,
    metadata_xml: Option<String>,
    source: Option<PathBuf>,
}

impl Scene {
    /// Open and decode a scene directory or zip archive
    pub fn open<P: AsRef<Path>>(path: P) -> RangesatResult<Self> {
        SceneReader::open(path)?.read()
    }

    /// Build a scene from in-memory bands `(name, values, nodata)`
    pub fn from_parts(
        product: ProductId,
        transform: GeoTransform,
        crs_wkt: String,
        layers: Vec<(String, Raster, Option<f64>)>,
    ) -> RangesatResult<Self> {
        let shape = layers
            .iter()
            .find(|(name, _, _)| name == PIXEL_QA)
            .map(|(_, data, _)| data.dim())
            .ok_or_else(|| RangesatError::Decode(format!("{} has no {} band", product, PIXEL_QA)))?;

        let mut bands = HashMap::new();
        let mut nodata = HashMap::new();
        for (name, data, nd) in layers {
            if data.dim() != shape {
                return Err(RangesatError::Decode(format!(
                    "band {} has shape {:?}, expected {:?}",
                    name,
                    data.dim(),
                    shape
                )));
            }
            nodata.insert(name.clone(), nd);
            bands.insert(name, data);
        }

        Ok(Self {
            product,
            bands,
            nodata,
            transform,
            crs_wkt,
            shape,
            metadata: SceneMetadata::default(),
            metadata_xml: None,
            source: None,
        })
    }

    pub fn product(&self) -> &ProductId {
        &self.product
    }

    pub fn product_id(&self) -> &str {
        &self.product.id
    }

    pub fn satellite(&self) -> Satellite {
        self.product.satellite
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.product.acquisition_date
    }

    pub fn wrs(&self) -> Wrs {
        self.product.wrs
    }

    pub fn metadata(&self) -> &SceneMetadata {
        &self.metadata
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs_wkt(&self) -> &str {
        &self.crs_wkt
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Pixel edge length in CRS units
    pub fn cellsize(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    /// Projected extent `[left, bottom, right, top]`
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape.0, self.shape.1)
    }

    pub fn wgs_bounds(&self) -> RangesatResult<Option<BoundingBox>> {
        if self.crs_wkt.is_empty() {
            return Ok(None);
        }
        Ok(Some(transform_bbox(&self.bounds(), &self.crs_wkt, WGS84)?))
    }

    pub fn summary(&self) -> RangesatResult<SceneSummary> {
        Ok(SceneSummary {
            product_id: self.product.id.clone(),
            satellite: self.product.satellite,
            acquisition_date: self.product.acquisition_date,
            wrs: self.product.wrs,
            bounds: self.bounds(),
            wgs_bounds: self.wgs_bounds()?,
        })
    }

    pub fn band_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    /// Raw band values
    pub fn band(&self, name: &str) -> RangesatResult<&Raster> {
        self.bands.get(name).ok_or_else(|| RangesatError::MissingBand {
            band: name.to_string(),
            satellite: self.satellite(),
        })
    }

    /// Band values with the band's nodata cells invalid
    pub fn band_masked(&self, name: &str) -> RangesatResult<MaskedGrid> {
        let data = self.band(name)?;
        let nodata = self.nodata.get(name).copied().flatten();
        Ok(MaskedGrid::with_nodata(data.clone(), nodata))
    }

    /// Calibrated, OLI-harmonised surface reflectance
    pub fn reflectance(&self, band: SpectralBand) -> RangesatResult<MaskedGrid> {
        let profile = sensor_profile(self.satellite());
        let name = profile.band_name(band).ok_or_else(|| RangesatError::MissingBand {
            band: band.to_string(),
            satellite: self.satellite(),
        })?;
        let dn = self.band_masked(name)?;
        let band_meta = self.metadata.band(name);
        let (lo, hi) = band_meta.and_then(|b| b.valid_range).unwrap_or(SR_VALID_RANGE);
        let saturated = band_meta.and_then(|b| b.saturate_value);
        let out_of_range = dn
            .values()
            .mapv(|v| v < lo || v > hi || saturated == Some(v));
        let calibration = profile.calibration(band);
        Ok(dn.mask_where(&out_of_range)?.map(|v| calibration.apply(v)))
    }

    /// Spectral index grid; precomputed product bands take priority
    pub fn index(&self, index: SpectralIndex) -> RangesatResult<MaskedGrid> {
        if let Some(band) = index.precomputed_band() {
            if self.has_band(band) {
                let scale = self
                    .metadata
                    .band(band)
                    .and_then(|b| b.scale_factor)
                    .unwrap_or(INDEX_PRODUCT_SCALE);
                return Ok(&self.band_masked(band)? * scale);
            }
        }
        index.compute(|b| self.reflectance(b))
    }

    /// Aerosol QA layer: `sr_aerosol` (OLI) or `sr_atmos_opacity` (TM/ETM+)
    pub fn aerosol(&self) -> RangesatResult<MaskedGrid> {
        self.band_masked(sensor_profile(self.satellite()).aerosol_band)
    }

    /// Copy of the scene restricted to `window`
    pub fn crop(&self, window: &PixelWindow) -> RangesatResult<Scene> {
        if window.rows == 0
            || window.cols == 0
            || window.row_off + window.rows > self.shape.0
            || window.col_off + window.cols > self.shape.1
        {
            return Err(RangesatError::GeometryMismatch(format!(
                "window {:?} outside scene {:?}",
                window, self.shape
            )));
        }
        let rows = window.row_off..window.row_off + window.rows;
        let cols = window.col_off..window.col_off + window.cols;
        let bands = self
            .bands
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    data.slice(ndarray::s![rows.clone(), cols.clone()]).to_owned(),
                )
            })
            .collect();
        Ok(Scene {
            bands,
            transform: self.transform.window_transform(window.row_off, window.col_off),
            shape: (window.rows, window.cols),
            ..self.clone_without_bands()
        })
    }

    fn clone_without_bands(&self) -> Scene {
        Scene {
            product: self.product.clone(),
            bands: HashMap::new(),
            nodata: self.nodata.clone(),
            transform: self.transform,
            crs_wkt: self.crs_wkt.clone(),
            shape: self.shape,
            metadata: self.metadata.clone(),
            metadata_xml: self.metadata_xml.clone(),
            source: self.source.clone(),
        }
    }

    /// Pixel window covering a WGS84 bounding box
    pub fn clip_window(&self, bbox_wgs: &BoundingBox) -> RangesatResult<PixelWindow> {
        let local = transform_bbox(bbox_wgs, WGS84, &self.crs_wkt)?;
        bbox_window(&self.transform, self.shape, &local)
    }

    /// Crop to `bbox_wgs` and write the cropped scene to `out_dir/<product_id>/`
    pub fn clip(&self, bbox_wgs: &BoundingBox, out_dir: &Path) -> RangesatResult<Scene> {
        let window = self.clip_window(bbox_wgs)?;
        let mut clipped = self.crop(&window)?;
        let dir = clipped.save(out_dir)?;
        clipped.source = Some(dir);
        Ok(clipped)
    }

    /// Write every band (LZW GeoTIFF, storage type inferred from values) and
    /// the metadata XML to `out_dir/<product_id>/`, replacing earlier output
    pub fn save(&self, out_dir: &Path) -> RangesatResult<PathBuf> {
        let dir = out_dir.join(self.product_id());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        for name in self.band_names() {
            let layer = RasterLayer {
                data: self.bands[name].clone(),
                transform: self.transform,
                crs_wkt: self.crs_wkt.clone(),
                nodata: self.nodata.get(name).copied().flatten(),
            };
            let sample_type = SampleType::infer(&layer.data, layer.nodata);
            geotiff::write_band(dir.join(format!("{}_{}.tif", self.product_id(), name)), &layer, sample_type)?;
        }
        if let Some(xml) = &self.metadata_xml {
            std::fs::write(dir.join(format!("{}.xml", self.product_id())), xml)?;
        }
        log::info!("Saved {} to {}", self.product_id(), dir.display());
        Ok(dir)
    }

    /// Float32 GeoTIFF on the scene grid; invalid cells become `nodata`
    pub fn dump(&self, grid: &MaskedGrid, dst: &Path, nodata: f64) -> RangesatResult<()> {
        if grid.dim() != self.shape {
            return Err(RangesatError::GeometryMismatch(format!(
                "grid {:?} does not match scene {:?}",
                grid.dim(),
                self.shape
            )));
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        geotiff::write_float32(dst, &grid.filled(nodata), &self.transform, &self.crs_wkt, nodata)
    }

    /// Gamma-stretched 8-bit true colour preview
    pub fn dump_rgb(&self, dst: &Path, gamma: Option<f64>) -> RangesatResult<()> {
        const RED_GAMMA: f64 = 1.03;
        const BLUE_GAMMA: f64 = 0.925;

        let profile = sensor_profile(self.satellite());
        let channel = |band: SpectralBand, band_gamma: f64| -> RangesatResult<Array2<u8>> {
            let name = profile.band_name(band).ok_or_else(|| RangesatError::MissingBand {
                band: band.to_string(),
                satellite: self.satellite(),
            })?;
            let dn = self.band_masked(name)?;
            let mut out = Array2::<u8>::zeros(self.shape);
            Zip::from(&mut out)
                .and(dn.values())
                .and(dn.valid())
                .for_each(|o, &v, &ok| {
                    if ok {
                        let mut r = (v.abs() * SR_SCALE).powf(1.0 / band_gamma).clamp(0.0, 1.0);
                        if let Some(g) = gamma {
                            r = r.powf(1.0 / g);
                        }
                        *o = (r * 255.0) as u8;
                    }
                });
            Ok(out)
        };

        let red = channel(SpectralBand::Red, RED_GAMMA)?;
        let green = channel(SpectralBand::Green, 1.0)?;
        let blue = channel(SpectralBand::Blue, BLUE_GAMMA)?;
        geotiff::write_rgb(dst, [&red, &green, &blue], &self.transform, &self.crs_wkt)
    }
}

/// Scene extent in WGS84 from the `pixel_qa` header alone. Nothing is
/// extracted from zip archives. A scene without a CRS is taken to be in WGS84
/// coordinates already, the same convention the clipped read follows.
pub fn scene_wgs_bounds<P: AsRef<Path>>(path: P) -> RangesatResult<BoundingBox> {
    let qa = pixel_qa_source(path.as_ref())?;
    let (transform, (rows, cols), crs) = geotiff::read_header(&qa)?;
    log::debug!("Read extent of {} from {}", path.as_ref().display(), qa.display());
    transform_bbox(&transform.bounds(rows, cols), &crs, WGS84)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn product() -> ProductId {
        "LC08_L1TP_042028_20150510_20170301_01_T1".parse().unwrap()
    }

    fn scene() -> Scene {
        let gt = GeoTransform::north_up(0.0, 60.0, 30.0);
        Scene::from_parts(
            product(),
            gt,
            String::new(),
            vec![
                ("pixel_qa".to_string(), array![[2.0, 2.0], [2.0, 1.0]], Some(1.0)),
                ("sr_band4".to_string(), array![[1000.0, -9999.0], [-500.0, 17000.0]], Some(-9999.0)),
                ("sr_band5".to_string(), array![[3000.0, 3000.0], [3000.0, 3000.0]], Some(-9999.0)),
                ("sr_ndvi".to_string(), array![[5000.0, -9999.0], [2000.0, 0.0]], Some(-9999.0)),
                ("sr_aerosol".to_string(), array![[64.0, 200.0], [1.0, 1.0]], None),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_bbox_window_encloses_box() {
        let gt = GeoTransform::north_up(0.0, 300.0, 30.0);
        let window = bbox_window(&gt, (10, 10), &BoundingBox::new(45.0, 200.0, 100.0, 290.0)).unwrap();
        assert_eq!(
            window,
            PixelWindow {
                row_off: 0,
                col_off: 1,
                rows: 4,
                cols: 3
            }
        );

        // aligned box maps to exactly its pixels
        let window = bbox_window(&gt, (10, 10), &BoundingBox::new(30.0, 210.0, 90.0, 270.0)).unwrap();
        assert_eq!((window.row_off, window.col_off, window.rows, window.cols), (1, 1, 2, 2));

        // intersected with the raster extent
        let window = bbox_window(&gt, (10, 10), &BoundingBox::new(-100.0, -100.0, 45.0, 400.0)).unwrap();
        assert_eq!((window.row_off, window.col_off, window.rows, window.cols), (0, 0, 10, 2));
    }

    #[test]
    fn test_bbox_window_outside_is_geometry_mismatch() {
        let gt = GeoTransform::north_up(0.0, 300.0, 30.0);
        let result = bbox_window(&gt, (10, 10), &BoundingBox::new(400.0, 0.0, 500.0, 100.0));
        assert!(matches!(result, Err(RangesatError::GeometryMismatch(_))));
    }

    #[test]
    fn test_co_register_crops_to_common_window() {
        let a = GridHeader {
            transform: GeoTransform::north_up(0.0, 300.0, 30.0),
            shape: (10, 10),
        };
        let b = GridHeader {
            transform: GeoTransform::north_up(60.0, 270.0, 30.0),
            shape: (10, 10),
        };
        let grid = co_register(&[a.clone(), b]).unwrap();
        assert_eq!(grid.shape, (9, 8));
        assert_eq!(grid.offsets, vec![(1, 2), (0, 0)]);
        assert_eq!(grid.transform, GeoTransform::north_up(60.0, 270.0, 30.0));

        let coarse = GridHeader {
            transform: GeoTransform::north_up(0.0, 300.0, 60.0),
            shape: (5, 5),
        };
        assert!(matches!(co_register(&[a.clone(), coarse]), Err(RangesatError::Decode(_))));

        let shifted = GridHeader {
            transform: GeoTransform::north_up(15.0, 300.0, 30.0),
            shape: (10, 10),
        };
        assert!(co_register(&[a, shifted]).is_err());
    }

    #[test]
    fn test_missing_pixel_qa_is_decode_error() {
        let result = Scene::from_parts(
            product(),
            GeoTransform::north_up(0.0, 0.0, 30.0),
            String::new(),
            vec![("sr_band4".to_string(), array![[1.0]], None)],
        );
        assert!(matches!(result, Err(RangesatError::Decode(_))));
    }

    #[test]
    fn test_band_lookup_and_missing_band() {
        let s = scene();
        assert_eq!(s.band("sr_band4").unwrap()[[0, 0]], 1000.0);
        assert!(matches!(s.band("sr_band6"), Err(RangesatError::MissingBand { .. })));
        assert_eq!(s.cellsize(), 30.0);
        assert_eq!(s.bounds(), BoundingBox::new(0.0, 0.0, 60.0, 60.0));
        assert_eq!(s.wgs_bounds().unwrap(), None);
    }

    #[test]
    fn test_reflectance_masks_nodata_and_range() {
        let red = scene().reflectance(SpectralBand::Red).unwrap();
        assert_relative_eq!(red.get(0, 0).unwrap(), 0.1, epsilon = 1e-12);
        assert_eq!(red.get(0, 1), None);
        // negative DN within range is absolute valued
        assert_relative_eq!(red.get(1, 0).unwrap(), 0.05, epsilon = 1e-12);
        // above the documented valid range
        assert_eq!(red.get(1, 1), None);
    }

    #[test]
    fn test_precomputed_index_has_priority() {
        let ndvi = scene().index(SpectralIndex::Ndvi).unwrap();
        assert_relative_eq!(ndvi.get(0, 0).unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(ndvi.get(0, 1), None);
        assert_relative_eq!(ndvi.get(1, 0).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_index_computed_when_no_product_band() {
        let sr = scene().index(SpectralIndex::Sr).unwrap();
        assert_relative_eq!(sr.get(0, 0).unwrap(), 3.0, epsilon = 1e-12);
        assert_eq!(sr.get(0, 1), None);

        assert!(matches!(
            scene().index(SpectralIndex::Nbr),
            Err(RangesatError::MissingBand { .. })
        ));
    }

    #[test]
    fn test_aerosol_band_by_sensor() {
        let aerosol = scene().aerosol().unwrap();
        assert_eq!(aerosol.get(0, 1), Some(200.0));
    }

    #[test]
    fn test_crop_keeps_grid_consistent() {
        let s = scene();
        let cropped = s
            .crop(&PixelWindow {
                row_off: 1,
                col_off: 0,
                rows: 1,
                cols: 2,
            })
            .unwrap();
        assert_eq!(cropped.shape(), (1, 2));
        assert_eq!(cropped.band("sr_band5").unwrap().dim(), (1, 2));
        assert_eq!(cropped.band("pixel_qa").unwrap()[[0, 1]], 1.0);
        assert_eq!(cropped.transform().top_left_y, 30.0);
        assert!(s.crop(&PixelWindow { row_off: 1, col_off: 1, rows: 2, cols: 1 }).is_err());
    }
}
