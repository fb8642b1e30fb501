//! Export vers Shapefile (archive ZIP: .shp, .shx, .dbf, .prj, .cpg)
//!
//! Une couche ne porte qu'un seul type de géométrie. Les noms de champs dBase
//! sont limités à 10 caractères ASCII; les textes à 254 octets.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use shapefile::dbase::{self, FieldName, FieldValue, TableWriterBuilder};
use shapefile::{Polygon, PolygonRing, Polyline};
use tracing::debug;

use crate::archive;
use crate::types::{AttributeValue, Geometry, GeometryKind, GeometryRecord};
use crate::GeoSurveyError;

/// Système de coordonnées écrit dans le `.prj`
pub const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

const FIELD_NAME_LEN: usize = 10;
const TEXT_FIELD_LEN: u8 = 254;

/// Regroupe des enregistrements par type de géométrie (un Shapefile par groupe)
pub fn split_by_kind<'a, I>(records: I) -> BTreeMap<GeometryKind, Vec<&'a GeometryRecord>>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let mut groups: BTreeMap<GeometryKind, Vec<&GeometryRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.kind()).or_default().push(record);
    }
    groups
}

/// Champ dBase: nom tronqué, clé d'attribut d'origine, type
#[derive(Debug, Clone, PartialEq)]
struct FieldPlan {
    name: String,
    key: String,
    numeric: bool,
}

fn sanitize_field_name(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(FIELD_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "field".to_string()
    } else {
        cleaned
    }
}

/// Nom unique (insensible à la casse) d'au plus 10 caractères
fn unique_field_name(base: String, taken: &[FieldPlan]) -> String {
    let clash = |candidate: &str| taken.iter().any(|f| f.name.eq_ignore_ascii_case(candidate));
    if !clash(&base) {
        return base;
    }
    (1..)
        .map(|n| {
            let suffix = format!("_{}", n);
            let keep = FIELD_NAME_LEN.saturating_sub(suffix.len());
            format!("{}{}", &base[..base.len().min(keep)], suffix)
        })
        .find(|candidate| !clash(candidate))
        .unwrap_or(base)
}

fn plan_fields(records: &[&GeometryRecord]) -> Vec<FieldPlan> {
    let mut keys: Vec<&str> = Vec::new();
    for record in records {
        for key in record.attributes.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let mut plan: Vec<FieldPlan> = Vec::with_capacity(keys.len());
    for key in keys {
        let numeric = records
            .iter()
            .filter_map(|r| r.attributes.get(key))
            .all(|v| matches!(v, AttributeValue::Integer(_) | AttributeValue::Number(_)));
        let name = unique_field_name(sanitize_field_name(key), &plan);
        if name != key {
            debug!(key, field = %name, "Attribute renamed for dBase");
        }
        plan.push(FieldPlan {
            name,
            key: key.to_string(),
            numeric,
        });
    }
    plan
}

fn field_name(name: &str) -> Result<FieldName, GeoSurveyError> {
    FieldName::try_from(name)
        .map_err(|e| GeoSurveyError::Shapefile(format!("invalid field name {}: {:?}", name, e)))
}

fn table_builder(plan: &[FieldPlan]) -> Result<TableWriterBuilder, GeoSurveyError> {
    let mut builder = TableWriterBuilder::new();
    for field in plan {
        let name = field_name(&field.name)?;
        builder = if field.numeric {
            builder.add_numeric_field(name, 18, 6)
        } else {
            builder.add_character_field(name, TEXT_FIELD_LEN)
        };
    }
    Ok(builder)
}

/// Tronque à `max` octets sur une frontière de caractère
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn dbf_record(record: &GeometryRecord, plan: &[FieldPlan]) -> dbase::Record {
    let mut row = dbase::Record::default();
    for field in plan {
        let value = record.attributes.get(&field.key);
        let value = if field.numeric {
            FieldValue::Numeric(value.and_then(AttributeValue::as_f64))
        } else {
            FieldValue::Character(
                value.map(|v| truncate_bytes(&v.to_string(), TEXT_FIELD_LEN as usize).to_string()),
            )
        };
        row.insert(field.name.clone(), value);
    }
    row
}

fn layer_file_stem(layer_name: &str) -> String {
    let stem: String = layer_name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if stem.is_empty() {
        "export".to_string()
    } else {
        stem
    }
}

/// Lit le jeu complet de fichiers compagnons; un fichier absent est une erreur
fn read_components(dir: &Path, stem: &str) -> Result<Vec<(String, Vec<u8>)>, GeoSurveyError> {
    archive::SHAPEFILE_COMPONENTS
        .iter()
        .map(|extension| {
            let name = format!("{}.{}", stem, extension);
            let bytes = fs::read(dir.join(&name)).map_err(|e| {
                GeoSurveyError::Shapefile(format!("component {} not written: {}", name, e))
            })?;
            Ok((name, bytes))
        })
        .collect()
}

/// Exporte des enregistrements d'un seul type de géométrie en Shapefile zippé
pub fn export<'a, I>(records: I, layer_name: &str) -> Result<Vec<u8>, GeoSurveyError>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let records: Vec<&GeometryRecord> = records.into_iter().collect();
    if records.is_empty() {
        return Err(GeoSurveyError::ExportPrecondition(
            "no records to export".to_string(),
        ));
    }

    let groups = split_by_kind(records.iter().copied());
    if groups.len() > 1 {
        let kinds: Vec<&str> = groups.keys().map(GeometryKind::as_str).collect();
        return Err(GeoSurveyError::ExportPrecondition(format!(
            "a shapefile layer holds a single geometry type, got {}; split records by type first",
            kinds.join(", ")
        )));
    }

    let plan = plan_fields(&records);
    let stem = layer_file_stem(layer_name);
    let scratch = tempfile::Builder::new().prefix("geosurvey-export-").tempdir()?;
    let shp_path = scratch.path().join(format!("{}.shp", stem));

    let mut writer = shapefile::Writer::from_path(&shp_path, table_builder(&plan)?)?;
    for record in &records {
        let row = dbf_record(record, &plan);
        match &record.geometry {
            Geometry::Point(p) => {
                writer.write_shape_and_record(&shapefile::Point::new(p.x(), p.y()), &row)?
            }
            Geometry::LineString(ls) => {
                let points = ls.0.iter().map(|c| shapefile::Point::new(c.x, c.y)).collect();
                writer.write_shape_and_record(&Polyline::new(points), &row)?
            }
            Geometry::Polygon(polygon) => {
                let ring = polygon
                    .exterior()
                    .0
                    .iter()
                    .map(|c| shapefile::Point::new(c.x, c.y))
                    .collect();
                writer.write_shape_and_record(&Polygon::new(PolygonRing::Outer(ring)), &row)?
            }
        }
    }
    drop(writer);

    fs::write(scratch.path().join(format!("{}.prj", stem)), WGS84_WKT)?;
    fs::write(scratch.path().join(format!("{}.cpg", stem)), "UTF-8")?;

    let files = read_components(scratch.path(), &stem)?;

    debug!(
        layer = %stem,
        records = records.len(),
        fields = plan.len(),
        "Shapefile written"
    );
    archive::pack(&files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, SourceFormat};
    use geo::Coord;

    fn point(attrs: Attributes) -> GeometryRecord {
        GeometryRecord::new(Geometry::point(85.0, 27.0), attrs, SourceFormat::Kml)
    }

    #[test]
    fn test_empty_input_rejected() {
        let records: Vec<GeometryRecord> = Vec::new();
        let err = export(&records, "empty").unwrap_err();
        assert!(matches!(err, GeoSurveyError::ExportPrecondition(_)));
    }

    #[test]
    fn test_mixed_kinds_rejected() {
        let line = GeometryRecord::new(
            Geometry::line_string(vec![Coord { x: 85.0, y: 27.0 }, Coord { x: 85.1, y: 27.1 }])
                .unwrap(),
            Attributes::new(),
            SourceFormat::Csv,
        );
        let records = vec![point(Attributes::new()), line];
        let err = export(&records, "mixed").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Point"));
        assert!(message.contains("LineString"));

        let groups = split_by_kind(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&GeometryKind::Point].len(), 1);
    }

    #[test]
    fn test_archive_components() {
        let records = vec![point([("name", "A")].into_iter().collect())];
        let zip = export(&records, "my layer").unwrap();
        let mut entries = archive::list_entries(&zip).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec!["mylayer.cpg", "mylayer.dbf", "mylayer.prj", "mylayer.shp", "mylayer.shx"]
        );
    }

    #[test]
    fn test_missing_component_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        for extension in ["shp", "dbf", "prj", "cpg"] {
            fs::write(dir.path().join(format!("layer.{}", extension)), b"x").unwrap();
        }
        let err = read_components(dir.path(), "layer").unwrap_err();
        assert!(err.to_string().contains("layer.shx"));

        fs::write(dir.path().join("layer.shx"), b"x").unwrap();
        assert_eq!(read_components(dir.path(), "layer").unwrap().len(), 5);
    }

    #[test]
    fn test_field_names_truncated_and_unique() {
        let attrs: Attributes = [
            ("registration_number", "1"),
            ("registration_office", "2"),
            ("ward no", "3"),
        ]
        .into_iter()
        .collect();
        let record = point(attrs);
        let plan = plan_fields(&[&record]);
        let names: Vec<&str> = plan.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["registrati", "registra_1", "ward_no"]);
        assert!(plan.iter().all(|f| !f.numeric));
    }

    #[test]
    fn test_numeric_fields() {
        let mut a = Attributes::new();
        a.insert("ward", 4i64);
        a.insert("mixed", 1.5);
        let mut b = Attributes::new();
        b.insert("ward", 7i64);
        b.insert("mixed", "n/a");
        let records = [point(a), point(b)];
        let plan = plan_fields(&records.iter().collect::<Vec<_>>());
        assert!(plan[0].numeric);
        assert!(!plan[1].numeric);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let text = "é".repeat(200);
        let truncated = truncate_bytes(&text, 254);
        assert_eq!(truncated.len(), 254);
        assert!(truncate_bytes("short", 254) == "short");
        assert_eq!(truncate_bytes("aé", 2), "a");
    }
}
