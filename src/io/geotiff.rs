use std::path::Path;

use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;

use crate::types::{GeoTransform, RangesatError, RangesatResult, Raster};

/// One raster band with its georeferencing
#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub data: Raster,
    pub transform: GeoTransform,
    pub crs_wkt: String,
    pub nodata: Option<f64>,
}

impl RasterLayer {
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Storage type used when a band is written back to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    UInt8,
    Int16,
    UInt16,
    Float32,
}

impl SampleType {
    /// Narrowest integer type that holds every value, else `Float32`
    pub fn infer(data: &Raster, nodata: Option<f64>) -> Self {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in data.iter().chain(nodata.iter()) {
            if !v.is_finite() || v.fract() != 0.0 {
                return SampleType::Float32;
            }
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if lo >= 0.0 && hi <= u8::MAX as f64 {
            SampleType::UInt8
        } else if lo >= i16::MIN as f64 && hi <= i16::MAX as f64 {
            SampleType::Int16
        } else if lo >= 0.0 && hi <= u16::MAX as f64 {
            SampleType::UInt16
        } else {
            SampleType::Float32
        }
    }
}

/// Read band 1 of a raster file as `f64`
pub fn read_band<P: AsRef<Path>>(path: P) -> RangesatResult<RasterLayer> {
    let (_, (height, width), _) = read_header(path.as_ref())?;
    read_band_window(path, (0, 0), (height, width))
}

/// Read a `(rows, cols)` window of band 1 starting at `(row_off, col_off)`.
/// The returned transform is that of the window.
pub fn read_band_window<P: AsRef<Path>>(
    path: P,
    offset: (usize, usize),
    size: (usize, usize),
) -> RangesatResult<RasterLayer> {
    let path = path.as_ref();
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let (row_off, col_off) = offset;
    let (rows, cols) = size;
    if row_off + rows > height || col_off + cols > width {
        return Err(RangesatError::GeometryMismatch(format!(
            "{}: window {:?}+{:?} exceeds raster {}x{}",
            path.display(),
            offset,
            size,
            height,
            width
        )));
    }

    let transform = GeoTransform::from_gdal(dataset.geo_transform()?).window_transform(row_off, col_off);
    let crs_wkt = dataset.projection();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let buffer = rasterband.read_as::<f64>(
        (col_off as isize, row_off as isize),
        (cols, rows),
        (cols, rows),
        None,
    )?;
    let data = Array2::from_shape_vec((rows, cols), buffer.data).map_err(|e| {
        RangesatError::Decode(format!("{}: unexpected buffer shape: {}", path.display(), e))
    })?;

    log::debug!(
        "Read {} window {:?} ({}x{}, nodata {:?})",
        path.display(),
        offset,
        rows,
        cols,
        nodata
    );

    Ok(RasterLayer {
        data,
        transform,
        crs_wkt,
        nodata,
    })
}

/// Georeferencing header of band 1 without reading pixels
pub fn read_header<P: AsRef<Path>>(path: P) -> RangesatResult<(GeoTransform, (usize, usize), String)> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    Ok((
        GeoTransform::from_gdal(dataset.geo_transform()?),
        (height, width),
        dataset.projection(),
    ))
}

fn lzw_options() -> [RasterCreationOption<'static>; 1] {
    [RasterCreationOption {
        key: "COMPRESS",
        value: "LZW",
    }]
}

fn create_dataset<T: GdalType>(
    path: &Path,
    shape: (usize, usize),
    bands: isize,
    transform: &GeoTransform,
    crs_wkt: &str,
) -> RangesatResult<Dataset> {
    let (height, width) = shape;
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path,
        width as isize,
        height as isize,
        bands,
        &lzw_options(),
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    if !crs_wkt.is_empty() {
        dataset.set_projection(crs_wkt)?;
    }
    Ok(dataset)
}

fn write_typed<T: GdalType + Copy>(
    path: &Path,
    data: &Raster,
    transform: &GeoTransform,
    crs_wkt: &str,
    nodata: Option<f64>,
    convert: impl Fn(f64) -> T,
) -> RangesatResult<()> {
    let (height, width) = data.dim();
    let dataset = create_dataset::<T>(path, (height, width), 1, transform, crs_wkt)?;
    let mut rasterband = dataset.rasterband(1)?;
    let flat: Vec<T> = data.iter().map(|&v| convert(v)).collect();
    rasterband.write((0, 0), (width, height), &Buffer::new((width, height), flat))?;
    rasterband.set_no_data_value(nodata)?;
    Ok(())
}

/// Single band float32 GeoTIFF, LZW compressed
pub fn write_float32<P: AsRef<Path>>(
    path: P,
    data: &Raster,
    transform: &GeoTransform,
    crs_wkt: &str,
    nodata: f64,
) -> RangesatResult<()> {
    write_typed(path.as_ref(), data, transform, crs_wkt, Some(nodata), |v| v as f32)?;
    log::debug!("Wrote {}", path.as_ref().display());
    Ok(())
}

/// Single band GeoTIFF in the given storage type, LZW compressed
pub fn write_band<P: AsRef<Path>>(path: P, layer: &RasterLayer, sample_type: SampleType) -> RangesatResult<()> {
    let path = path.as_ref();
    let (data, gt, crs, nd) = (&layer.data, &layer.transform, layer.crs_wkt.as_str(), layer.nodata);
    match sample_type {
        SampleType::UInt8 => write_typed(path, data, gt, crs, nd, |v| v as u8),
        SampleType::Int16 => write_typed(path, data, gt, crs, nd, |v| v as i16),
        SampleType::UInt16 => write_typed(path, data, gt, crs, nd, |v| v as u16),
        SampleType::Float32 => write_typed(path, data, gt, crs, nd, |v| v as f32),
    }
}

/// Three band 8-bit GeoTIFF, LZW compressed
pub fn write_rgb<P: AsRef<Path>>(
    path: P,
    rgb: [&Array2<u8>; 3],
    transform: &GeoTransform,
    crs_wkt: &str,
) -> RangesatResult<()> {
    let (height, width) = rgb[0].dim();
    if rgb.iter().any(|band| band.dim() != (height, width)) {
        return Err(RangesatError::GeometryMismatch(
            "RGB channels differ in shape".to_string(),
        ));
    }
    let dataset = create_dataset::<u8>(path.as_ref(), (height, width), 3, transform, crs_wkt)?;
    for (i, channel) in rgb.iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        let flat: Vec<u8> = channel.iter().copied().collect();
        rasterband.write((0, 0), (width, height), &Buffer::new((width, height), flat))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sample_type_inference() {
        assert_eq!(SampleType::infer(&array![[0.0, 255.0]], None), SampleType::UInt8);
        assert_eq!(SampleType::infer(&array![[-2000.0, 16000.0]], Some(-9999.0)), SampleType::Int16);
        assert_eq!(SampleType::infer(&array![[322.0, 65535.0]], None), SampleType::UInt16);
        assert_eq!(SampleType::infer(&array![[0.5, 1.0]], None), SampleType::Float32);
        assert_eq!(SampleType::infer(&array![[1.0, 2.0]], Some(-9999.0)), SampleType::Int16);
    }

    #[test]
    fn test_float32_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        let gt = GeoTransform::north_up(500_000.0, 4_000_000.0, 30.0);
        let data = array![[1.5, -9999.0], [3.25, 4.0]];

        write_float32(&path, &data, &gt, "", -9999.0).unwrap();
        let layer = read_band(&path).unwrap();
        assert_eq!(layer.data, data);
        assert_eq!(layer.nodata, Some(-9999.0));
        assert_eq!(layer.transform, gt);
    }
}
