//! Parser Shapefile (archive ZIP ou `.shp` seul)
//!
//! Le bundle est extrait dans un répertoire temporaire possédé par l'appel de
//! parsing et supprimé à la sortie, erreur comprise. Les géométries
//! multi-parties donnent un enregistrement par partie; les anneaux intérieurs
//! sont ignorés.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use geo::Coord;
use regex::Regex;
use shapefile::dbase::{self, FieldValue};
use shapefile::{PolygonRing, Shape};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::SurveyParser;
use crate::archive::{self, ExtractedBundle};
use crate::error::RecordError;
use crate::types::{
    AttributeValue, Attributes, Geometry, GeometryKind, GeometryRecord, ParseResult, SourceFormat,
};
use crate::GeoSurveyError;

/// Parser Shapefile
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapefileParser;

impl SurveyParser for ShapefileParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Shapefile
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
        let scratch = tempfile::Builder::new()
            .prefix("geosurvey-shp-")
            .tempdir()?;
        parse_in(bytes, scratch)
    }
}

/// Parse un Shapefile en utilisant `scratch` comme répertoire d'extraction
///
/// `scratch` est consommé: il est supprimé avant le retour.
pub fn parse_in(bytes: &[u8], scratch: TempDir) -> Result<ParseResult, GeoSurveyError> {
    let bundle = if archive::is_zip(bytes) {
        archive::extract_shapefile_bundle(bytes, scratch)?
    } else {
        archive::stage_bare_shape(bytes, scratch)?
    };

    let mut result = ParseResult::default();
    read_bundle_metadata(&bundle, &mut result);

    let features = read_features(&bundle)?;
    debug!(features = features.len(), "Shapefile features read");

    for (index, (shape, attributes)) in features.into_iter().enumerate() {
        match convert_shape(&shape) {
            Ok(parts) => {
                if parts.len() > 1 {
                    debug!(index, parts = parts.len(), "Multi-part feature split");
                }
                for part in parts {
                    match part {
                        Ok((geometry, altitude)) => result.records.push(
                            GeometryRecord::new(geometry, attributes.clone(), SourceFormat::Shapefile)
                                .with_altitude(altitude),
                        ),
                        Err(reason) => {
                            warn!(index, reason = %reason, "Shapefile part skipped");
                            result.per_record_errors.push(RecordError::new(index, reason));
                        }
                    }
                }
            }
            Err(reason) => {
                warn!(index, reason = %reason, "Shapefile feature skipped");
                result.per_record_errors.push(RecordError::new(index, reason));
            }
        }
    }

    debug!(
        records = result.records.len(),
        errors = result.per_record_errors.len(),
        "Shapefile parsed"
    );
    Ok(result)
}

fn read_features(bundle: &ExtractedBundle) -> Result<Vec<(Shape, Attributes)>, GeoSurveyError> {
    let unreadable =
        |e: shapefile::Error| GeoSurveyError::fatal(SourceFormat::Shapefile, e.to_string());

    match bundle.companion("dbf") {
        Some(dbf) => {
            let order = field_order(&dbf);
            let features = shapefile::read(&bundle.shp_path).map_err(unreadable)?;
            Ok(features
                .into_iter()
                .map(|(shape, record)| (shape, record_attributes(record, &order)))
                .collect())
        }
        None => {
            warn!("No .dbf file, features have no attributes");
            let shapes = shapefile::read_shapes(&bundle.shp_path).map_err(unreadable)?;
            Ok(shapes.into_iter().map(|s| (s, Attributes::new())).collect())
        }
    }
}

/// Ordre des champs de la table attributaire
fn field_order(dbf: &Path) -> Vec<String> {
    match dbase::Reader::from_path(dbf) {
        Ok(reader) => reader.fields().iter().map(|f| f.name().to_string()).collect(),
        Err(e) => {
            warn!(error = %e, "Could not read .dbf header, field order is alphabetical");
            Vec::new()
        }
    }
}

fn record_attributes(record: dbase::Record, order: &[String]) -> Attributes {
    let mut values: HashMap<String, FieldValue> = record.into();
    let mut attributes = Attributes::new();

    for name in order {
        if let Some(value) = values.remove(name).and_then(attribute_value) {
            attributes.insert(name.as_str(), value);
        }
    }

    let mut rest: Vec<_> = values.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in rest {
        if let Some(value) = attribute_value(value) {
            attributes.insert(name, value);
        }
    }
    attributes
}

fn attribute_value(value: FieldValue) -> Option<AttributeValue> {
    match value {
        FieldValue::Character(s) => s
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(AttributeValue::Text),
        FieldValue::Memo(s) => Some(s).filter(|s| !s.is_empty()).map(AttributeValue::Text),
        FieldValue::Numeric(n) => n.map(AttributeValue::Number),
        FieldValue::Float(f) => f.map(|f| AttributeValue::Number(f as f64)),
        FieldValue::Double(d) => Some(AttributeValue::Number(d)),
        FieldValue::Currency(c) => Some(AttributeValue::Number(c)),
        FieldValue::Integer(i) => Some(AttributeValue::Integer(i as i64)),
        FieldValue::Logical(b) => b.map(AttributeValue::Boolean),
        FieldValue::Date(d) => d.map(|d| {
            AttributeValue::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }),
        other => Some(AttributeValue::Text(format!("{:?}", other))),
    }
}

/// Lecture `.prj` (CRS) et `.cpg` (encodage)
fn read_bundle_metadata(bundle: &ExtractedBundle, result: &mut ParseResult) {
    let meta = &mut result.format_metadata;

    if bundle.layer_count > 1 {
        meta.insert("layer_count".to_string(), bundle.layer_count.to_string());
    }

    if let Some(prj) = bundle.companion("prj") {
        match fs::read_to_string(&prj) {
            Ok(wkt) => {
                let wkt = wkt.trim().to_string();
                let crs = crs_from_wkt(&wkt);
                debug!(crs = ?crs.name, epsg = ?crs.epsg, "Shapefile CRS");
                if let Some(name) = crs.name {
                    meta.insert("crs".to_string(), name);
                }
                if let Some(epsg) = crs.epsg {
                    meta.insert("crs_epsg".to_string(), epsg);
                }
                meta.insert("crs_wkt".to_string(), wkt);
            }
            Err(e) => warn!(error = %e, "Unreadable .prj file"),
        }
    }

    if let Some(cpg) = bundle.companion("cpg") {
        if let Ok(encoding) = fs::read_to_string(&cpg) {
            let encoding = encoding.trim();
            if !encoding.is_empty() {
                meta.insert("encoding".to_string(), encoding.to_string());
            }
        }
    }
}

/// CRS déclaré dans un `.prj`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeclaredCrs {
    pub name: Option<String>,
    pub epsg: Option<String>,
}

fn crs_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r#"^\s*(?:PROJCS|GEOGCS|PROJCRS|GEOGCRS|GEODCRS)\s*\[\s*"([^"]+)""#,
            r#"AUTHORITY\s*\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#,
            r#"ID\s*\[\s*"EPSG"\s*,\s*(\d+)\s*\]"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Nom du CRS (premier élément de la WKT) et code EPSG de plus haut niveau
///
/// En WKT1 l'AUTHORITY du CRS complet est la dernière de la chaîne.
pub fn crs_from_wkt(wkt: &str) -> DeclaredCrs {
    let patterns = crs_patterns();
    let name = patterns
        .first()
        .and_then(|re| re.captures(wkt))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let epsg = patterns
        .iter()
        .skip(1)
        .find_map(|re| re.captures_iter(wkt).last())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    DeclaredCrs { name, epsg }
}

/// Conversion d'une shape vers zéro, une ou plusieurs géométries canoniques
type Parts = Vec<Result<(Geometry, Option<f64>), String>>;

trait PlanarPoint {
    fn coord(&self) -> Coord;

    fn altitude(&self) -> Option<f64> {
        None
    }
}

impl PlanarPoint for shapefile::Point {
    fn coord(&self) -> Coord {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointM {
    fn coord(&self) -> Coord {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointZ {
    fn coord(&self) -> Coord {
        Coord { x: self.x, y: self.y }
    }

    fn altitude(&self) -> Option<f64> {
        Some(self.z)
    }
}

fn convert_shape(shape: &Shape) -> Result<Parts, String> {
    match shape {
        Shape::NullShape => Err("feature has no geometry".to_string()),
        Shape::Point(p) => Ok(single_point(p)),
        Shape::PointM(p) => Ok(single_point(p)),
        Shape::PointZ(p) => Ok(single_point(p)),
        Shape::Multipoint(mp) => Ok(mp.points().iter().flat_map(single_point).collect()),
        Shape::MultipointM(mp) => Ok(mp.points().iter().flat_map(single_point).collect()),
        Shape::MultipointZ(mp) => Ok(mp.points().iter().flat_map(single_point).collect()),
        Shape::Polyline(pl) => Ok(line_parts(pl.parts())),
        Shape::PolylineM(pl) => Ok(line_parts(pl.parts())),
        Shape::PolylineZ(pl) => Ok(line_parts(pl.parts())),
        Shape::Polygon(pg) => Ok(outer_rings(pg.rings())),
        Shape::PolygonM(pg) => Ok(outer_rings(pg.rings())),
        Shape::PolygonZ(pg) => Ok(outer_rings(pg.rings())),
        Shape::Multipatch(_) => Err("Multipatch geometry is not supported".to_string()),
    }
}

fn single_point<P: PlanarPoint>(point: &P) -> Parts {
    let c = point.coord();
    vec![Ok((Geometry::point(c.x, c.y), point.altitude()))]
}

fn line_parts<P: PlanarPoint>(parts: &[Vec<P>]) -> Parts {
    parts
        .iter()
        .map(|part| {
            let altitude = part.first().and_then(PlanarPoint::altitude);
            let coords = part.iter().map(PlanarPoint::coord).collect();
            Geometry::from_coords(GeometryKind::LineString, coords).map(|g| (g, altitude))
        })
        .collect()
}

fn outer_rings<P: PlanarPoint>(rings: &[PolygonRing<P>]) -> Parts {
    let inner = rings
        .iter()
        .filter(|r| matches!(r, PolygonRing::Inner(_)))
        .count();
    if inner > 0 {
        debug!(inner, "Inner rings ignored");
    }

    rings
        .iter()
        .filter_map(|ring| match ring {
            PolygonRing::Outer(points) => Some(points),
            PolygonRing::Inner(_) => None,
        })
        .map(|points| {
            let altitude = points.first().and_then(PlanarPoint::altitude);
            let coords = points.iter().map(PlanarPoint::coord).collect();
            Geometry::from_coords(GeometryKind::Polygon, coords).map(|g| (g, altitude))
        })
        .collect()
}
