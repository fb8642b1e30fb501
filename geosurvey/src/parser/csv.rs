//! Parser CSV (table délimitée par des virgules, en-tête obligatoire)
//!
//! Détection des colonnes de géométrie, dans l'ordre:
//! 1. latitude/longitude par synonymes d'en-tête
//! 2. colonne `coordinates` (liste de couples `[lon, lat]` sérialisée)
//! 3. deux premières colonnes numériques plausibles en lon/lat

use geo::Coord;
use tracing::{debug, warn};

use super::{accept_pairs, SurveyParser};
use crate::error::RecordError;
use crate::types::{
    Attributes, Geometry, GeometryKind, GeometryRecord, ParseResult, SourceFormat, WellKnown,
};
use crate::GeoSurveyError;

/// Synonymes d'en-tête pour la latitude, par priorité
pub const LAT_SYNONYMS: &[&str] = &["lat", "latitude", "y", "y_coord", "ycoord"];

/// Synonymes d'en-tête pour la longitude, par priorité
pub const LON_SYNONYMS: &[&str] = &["lon", "long", "longitude", "lng", "x", "x_coord", "xcoord"];

/// Colonnes de géométrie et colonnes dérivées, jamais copiées en attributs
pub const RESERVED_COLUMNS: &[&str] = &[
    "coordinates",
    "geometry_type",
    "altitude",
    "area_hectares",
    "area_sqm",
];

/// Parser CSV
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvParser;

impl SurveyParser for CsvParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
        parse(bytes)
    }
}

/// Colonnes résolues depuis l'en-tête
#[derive(Debug, Default, Clone, PartialEq)]
struct ColumnLayout {
    lat: Option<usize>,
    lon: Option<usize>,
    coordinates: Option<usize>,
    geometry_type: Option<usize>,
    altitude: Option<usize>,
    reserved: Vec<usize>,
}

impl ColumnLayout {
    fn detect(headers: &[String], rows: &[(usize, csv::StringRecord)]) -> Self {
        let lower: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        let find = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|c| lower.iter().position(|h| h == c))
        };

        let mut layout = ColumnLayout {
            lat: find(LAT_SYNONYMS),
            lon: find(LON_SYNONYMS),
            coordinates: find(&["coordinates"][..]),
            geometry_type: find(&["geometry_type"][..]),
            altitude: find(&["altitude"][..]),
            reserved: Vec::new(),
        };

        if layout.lat.is_none() || layout.lon.is_none() {
            layout.lat = None;
            layout.lon = None;
            if layout.coordinates.is_none() {
                if let Some((lat, lon)) = numeric_fallback(&lower, rows) {
                    debug!(lat = %headers[lat], lon = %headers[lon], "Numeric coordinate columns");
                    layout.lat = Some(lat);
                    layout.lon = Some(lon);
                }
            }
        }

        layout.reserved = lower
            .iter()
            .enumerate()
            .filter(|(_, h)| RESERVED_COLUMNS.contains(&h.as_str()))
            .map(|(i, _)| i)
            .chain(layout.lat)
            .chain(layout.lon)
            .collect();
        layout
    }

    fn has_geometry(&self) -> bool {
        (self.lat.is_some() && self.lon.is_some()) || self.coordinates.is_some()
    }
}

/// Première paire de colonnes entièrement numériques dont les valeurs tiennent
/// dans les bornes lat et lon (dans un ordre ou l'autre); les colonnes hors
/// bornes (identifiants, surfaces) sont ignorées
fn numeric_fallback(lower: &[String], rows: &[(usize, csv::StringRecord)]) -> Option<(usize, usize)> {
    let fits_lat = |min: f64, max: f64| min >= -90.0 && max <= 90.0;
    let fits_lon = |min: f64, max: f64| min >= -180.0 && max <= 180.0;
    let mut ranges: Vec<(usize, f64, f64)> = Vec::new();

    for (col, header) in lower.iter().enumerate() {
        if RESERVED_COLUMNS.contains(&header.as_str()) {
            continue;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut seen = false;
        let numeric = rows.iter().all(|(_, row)| match row.get(col).map(str::trim) {
            None | Some("") => true,
            Some(v) => match fast_float::parse::<f64, _>(v) {
                Ok(n) if n.is_finite() => {
                    seen = true;
                    min = min.min(n);
                    max = max.max(n);
                    true
                }
                _ => false,
            },
        });
        if !(numeric && seen) || !fits_lon(min, max) {
            continue;
        }

        for &(other, o_min, o_max) in &ranges {
            if fits_lat(o_min, o_max) {
                return Some((other, col));
            }
            if fits_lat(min, max) {
                return Some((col, other));
            }
        }
        ranges.push((col, min, max));
    }
    None
}

/// Parse une table CSV complète
pub fn parse(bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| GeoSurveyError::fatal(SourceFormat::Csv, format!("unreadable header row: {}", e)))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(GeoSurveyError::fatal(SourceFormat::Csv, "missing header row"));
    }

    let mut result = ParseResult::default();
    result
        .format_metadata
        .insert("crs".to_string(), "WGS 84".to_string());
    result
        .format_metadata
        .insert("crs_epsg".to_string(), "4326".to_string());

    let mut rows = Vec::new();
    for (index, row) in reader.records().enumerate() {
        match row {
            Ok(row) if row.iter().all(|v| v.is_empty()) => {}
            Ok(row) => rows.push((index, row)),
            Err(e) => {
                let error = RecordError::new(index, format!("unreadable row: {}", e));
                warn!(index, reason = %error.reason, "Row skipped");
                result.per_record_errors.push(error);
            }
        }
    }

    let layout = ColumnLayout::detect(&headers, &rows);
    if !layout.has_geometry() {
        return Err(GeoSurveyError::fatal(
            SourceFormat::Csv,
            "could not detect latitude/longitude columns or a 'coordinates' column",
        ));
    }
    debug!(?layout, rows = rows.len(), "CSV layout detected");

    for (index, row) in &rows {
        match parse_row(*index, row, &headers, &layout) {
            Ok(record) => result.records.push(record),
            Err(e) => {
                warn!(index = e.index, reason = %e.reason, "Row skipped");
                result.per_record_errors.push(e);
            }
        }
    }

    result.per_record_errors.sort_by_key(|e| e.index);
    debug!(
        records = result.records.len(),
        errors = result.per_record_errors.len(),
        "CSV parsed"
    );
    Ok(result)
}

fn cell<'a>(row: &'a csv::StringRecord, col: Option<usize>) -> Option<&'a str> {
    col.and_then(|c| row.get(c)).filter(|v| !v.is_empty())
}

fn parse_row(
    index: usize,
    row: &csv::StringRecord,
    headers: &[String],
    layout: &ColumnLayout,
) -> Result<GeometryRecord, RecordError> {
    let geometry = row_geometry(row, layout).map_err(|reason| RecordError::new(index, reason))?;

    let mut attributes = Attributes::new();
    for (col, header) in headers.iter().enumerate() {
        if header.is_empty() || layout.reserved.contains(&col) {
            continue;
        }
        let Some(value) = cell(row, Some(col)) else {
            continue;
        };
        let key = WellKnown::from_alias(header)
            .map(|w| w.key().to_string())
            .unwrap_or_else(|| header.clone());
        attributes.insert_if_absent(key, value);
    }

    let altitude = cell(row, layout.altitude).and_then(|v| fast_float::parse::<f64, _>(v).ok());

    Ok(GeometryRecord::new(geometry, attributes, SourceFormat::Csv).with_altitude(altitude))
}

fn row_geometry(row: &csv::StringRecord, layout: &ColumnLayout) -> Result<Geometry, String> {
    if let (Some(lat), Some(lon)) = (cell(row, layout.lat), cell(row, layout.lon)) {
        let lat: f64 = fast_float::parse(lat).map_err(|_| format!("latitude '{}' is not a number", lat))?;
        let lon: f64 = fast_float::parse(lon).map_err(|_| format!("longitude '{}' is not a number", lon))?;
        let (accepted, rejected) = accept_pairs(vec![Coord { x: lon, y: lat }]);
        if let Some(reason) = rejected.into_iter().next() {
            return Err(reason);
        }
        return Geometry::from_coords(GeometryKind::Point, accepted);
    }

    if let Some(text) = cell(row, layout.coordinates) {
        let pairs = parse_coordinate_list(text)?;
        let (accepted, rejected) = accept_pairs(pairs);
        if !rejected.is_empty() {
            warn!(dropped = rejected.len(), reasons = ?rejected, "Coordinate pairs dropped");
        }

        let kind = match cell(row, layout.geometry_type) {
            Some(kind) => kind.parse::<GeometryKind>()?,
            None if accepted.len() == 1 => GeometryKind::Point,
            None => GeometryKind::Polygon,
        };
        return Geometry::from_coords(kind, accepted);
    }

    Err("row has neither latitude/longitude values nor a coordinates list".to_string())
}

/// Liste de couples sérialisée: `[[lon, lat], ...]`, `[lon, lat]`, ou avec
/// des parenthèses à la place des crochets
pub fn parse_coordinate_list(text: &str) -> Result<Vec<Coord>, String> {
    let normalized = text.replace('(', "[").replace(')', "]");
    let value: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|e| format!("coordinates column is not a list of pairs: {}", e))?;

    let pair = |v: &serde_json::Value| -> Option<Coord> {
        let items = v.as_array()?;
        match items.as_slice() {
            [x, y, ..] => Some(Coord {
                x: x.as_f64()?,
                y: y.as_f64()?,
            }),
            _ => None,
        }
    };

    let items = value
        .as_array()
        .ok_or_else(|| "coordinates column is not a list".to_string())?;

    // Couple isolé
    if items.first().is_some_and(serde_json::Value::is_number) {
        return pair(&value)
            .map(|c| vec![c])
            .ok_or_else(|| "coordinates column holds an incomplete pair".to_string());
    }

    // Anneau GeoJSON imbriqué une fois de plus: [[[lon, lat], ...]]
    let ring = match items.as_slice() {
        [inner] if inner.as_array().and_then(|a| a.first()).is_some_and(|f| f.is_array()) => {
            inner.as_array().map(Vec::as_slice).unwrap_or_default()
        }
        _ => items.as_slice(),
    };

    ring.iter()
        .enumerate()
        .map(|(i, v)| pair(v).ok_or_else(|| format!("coordinate pair {} is not [lon, lat]", i)))
        .collect()
}
