use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, RangesatError, RangesatResult, Satellite, Wrs};

/// Landsat Collection 1 product identifier,
/// e.g. `LC08_L1TP_042028_20150510_20170301_01_T1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductId {
    pub id: String,
    /// Two letter sensor code (`LC`, `LE`, `LT`, ...)
    pub sensor: String,
    pub satellite: Satellite,
    pub processing_level: String,
    pub wrs: Wrs,
    pub acquisition_date: NaiveDate,
    pub processing_date: NaiveDate,
    pub collection_number: u8,
    pub collection_category: String,
}

const PRODUCT_ID_PATTERN: &str =
    r"^(L[COTEM])(\d{2})_([A-Z0-9]{4})_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_([A-Z0-9]{2})$";

impl FromStr for ProductId {
    type Err = RangesatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(PRODUCT_ID_PATTERN)
            .map_err(|e| RangesatError::Processing(format!("product id pattern: {}", e)))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| RangesatError::Decode(format!("Malformed product id '{}'", s)))?;

        let number = |i: usize| -> RangesatResult<u16> {
            caps[i]
                .parse()
                .map_err(|_| RangesatError::Decode(format!("Malformed product id '{}'", s)))
        };
        let generation = number(2)? as u8;

        Ok(ProductId {
            id: s.to_string(),
            sensor: caps[1].to_string(),
            satellite: Satellite::from_generation(generation)?,
            processing_level: caps[3].to_string(),
            wrs: Wrs {
                path: number(4)?,
                row: number(5)?,
            },
            acquisition_date: parse_compact_date(&caps[6])?,
            processing_date: parse_compact_date(&caps[7])?,
            collection_number: number(8)? as u8,
            collection_category: caps[9].to_string(),
        })
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn parse_compact_date(s: &str) -> RangesatResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|e| RangesatError::Decode(format!("Invalid date '{}': {}", s, e)))
}

/// Split a band file name `<product_id>_<band>.tif` into its two parts
pub fn split_band_file_name(file_name: &str) -> Option<(String, String)> {
    let stem = file_name.strip_suffix(".tif").or_else(|| file_name.strip_suffix(".TIF"))?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() <= 7 {
        return None;
    }
    Some((parts[..7].join("_"), parts[7..].join("_")))
}

/// Per-band entry of the product metadata XML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandMetadata {
    pub name: String,
    pub product: Option<String>,
    pub data_type: Option<String>,
    pub fill_value: Option<f64>,
    pub saturate_value: Option<f64>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
    pub valid_range: Option<(f64, f64)>,
}

/// Fields of interest from the ESPA product metadata XML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub satellite: Option<String>,
    pub instrument: Option<String>,
    pub acquisition_date: Option<NaiveDate>,
    pub scene_center_time: Option<String>,
    pub wrs: Option<Wrs>,
    /// Geographic corners in WGS84
    pub bounding_coordinates: Option<BoundingBox>,
    pub bands: HashMap<String, BandMetadata>,
}

impl SceneMetadata {
    pub fn band(&self, name: &str) -> Option<&BandMetadata> {
        self.bands.get(name)
    }
}

/// Parse the ESPA metadata document. Unknown elements are ignored.
pub fn parse_scene_metadata(xml_content: &str) -> RangesatResult<SceneMetadata> {
    log::debug!("Parsing scene metadata XML ({} bytes)", xml_content.len());

    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut metadata = SceneMetadata::default();
    let mut buf = Vec::new();

    let mut in_global = false;
    let mut in_bounds = false;
    let mut current_band: Option<BandMetadata> = None;
    let mut current_tag = String::new();
    let mut corners: [Option<f64>; 4] = [None; 4];

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = local_name(e);
                match current_tag.as_str() {
                    "global_metadata" => in_global = true,
                    "bounding_coordinates" => in_bounds = true,
                    "band" => current_band = Some(band_from_attributes(e)?),
                    "valid_range" => set_valid_range(e, current_band.as_mut())?,
                    "wrs" if in_global => metadata.wrs = wrs_from_attributes(e)?,
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => match local_name(e).as_str() {
                "band" => {
                    let band = band_from_attributes(e)?;
                    metadata.bands.insert(band.name.clone(), band);
                }
                "valid_range" => set_valid_range(e, current_band.as_mut())?,
                "wrs" if in_global => metadata.wrs = wrs_from_attributes(e)?,
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "global_metadata" => in_global = false,
                    "bounding_coordinates" => in_bounds = false,
                    "band" => {
                        if let Some(band) = current_band.take() {
                            metadata.bands.insert(band.name.clone(), band);
                        }
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| RangesatError::Decode(format!("metadata XML text: {}", err)))?
                    .to_string();
                if in_bounds {
                    let slot = match current_tag.as_str() {
                        "west" => Some(0),
                        "south" => Some(1),
                        "east" => Some(2),
                        "north" => Some(3),
                        _ => None,
                    };
                    if let Some(i) = slot {
                        corners[i] = text.parse().ok();
                    }
                } else if in_global && current_band.is_none() {
                    match current_tag.as_str() {
                        "satellite" => metadata.satellite = Some(text),
                        "instrument" => metadata.instrument = Some(text),
                        "acquisition_date" => {
                            metadata.acquisition_date = NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok()
                        }
                        "scene_center_time" => metadata.scene_center_time = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RangesatError::Decode(format!(
                    "metadata XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if let [Some(west), Some(south), Some(east), Some(north)] = corners {
        metadata.bounding_coordinates = Some(BoundingBox::new(west, south, east, north));
    }

    log::debug!(
        "Metadata: satellite {:?}, {} bands",
        metadata.satellite,
        metadata.bands.len()
    );
    Ok(metadata)
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attributes(e: &BytesStart) -> RangesatResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| RangesatError::Decode(format!("metadata XML attribute: {}", err)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| RangesatError::Decode(format!("metadata XML attribute: {}", err)))?
            .to_string();
        out.insert(key, value);
    }
    Ok(out)
}

fn band_from_attributes(e: &BytesStart) -> RangesatResult<BandMetadata> {
    let attrs = attributes(e)?;
    let number = |key: &str| attrs.get(key).and_then(|v| v.trim().parse::<f64>().ok());
    Ok(BandMetadata {
        name: attrs.get("name").cloned().unwrap_or_default(),
        product: attrs.get("product").cloned(),
        data_type: attrs.get("data_type").cloned(),
        fill_value: number("fill_value"),
        saturate_value: number("saturate_value"),
        scale_factor: number("scale_factor"),
        add_offset: number("add_offset"),
        valid_range: None,
    })
}

fn set_valid_range(e: &BytesStart, band: Option<&mut BandMetadata>) -> RangesatResult<()> {
    if let Some(band) = band {
        let attrs = attributes(e)?;
        let min = attrs.get("min").and_then(|v| v.parse::<f64>().ok());
        let max = attrs.get("max").and_then(|v| v.parse::<f64>().ok());
        if let (Some(min), Some(max)) = (min, max) {
            band.valid_range = Some((min, max));
        }
    }
    Ok(())
}

fn wrs_from_attributes(e: &BytesStart) -> RangesatResult<Option<Wrs>> {
    let attrs = attributes(e)?;
    let path = attrs.get("path").and_then(|v| v.parse().ok());
    let row = attrs.get("row").and_then(|v| v.parse().ok());
    Ok(match (path, row) {
        (Some(path), Some(row)) => Some(Wrs { path, row }),
        _ => None,
    })
}
