//! Export vers CSV
//!
//! Colonnes: attributs connus, autres attributs (ordre de première
//! apparition), puis colonnes de géométrie et de surface.

use tracing::debug;

use crate::parser::csv::{LAT_SYNONYMS, LON_SYNONYMS, RESERVED_COLUMNS};
use crate::types::{Geometry, GeometryRecord, WellKnown};
use crate::GeoSurveyError;

/// Colonnes de géométrie ajoutées après les attributs
pub const GEOMETRY_COLUMNS: [&str; 7] = [
    "geometry_type",
    "latitude",
    "longitude",
    "coordinates",
    "altitude",
    "area_hectares",
    "area_sqm",
];

/// Ordre des attributs connus dans l'en-tête
const WELL_KNOWN_ORDER: [WellKnown; 4] = [
    WellKnown::Name,
    WellKnown::ParcelId,
    WellKnown::Owner,
    WellKnown::Description,
];

/// Un attribut dont le nom serait relu comme colonne de géométrie
fn is_reserved(key: &str) -> bool {
    let lower = key.to_lowercase();
    LAT_SYNONYMS.contains(&lower.as_str())
        || LON_SYNONYMS.contains(&lower.as_str())
        || RESERVED_COLUMNS.contains(&lower.as_str())
        || GEOMETRY_COLUMNS.contains(&lower.as_str())
}

/// Colonne d'attribut: en-tête écrit et clé d'origine
#[derive(Debug, Clone, PartialEq)]
struct AttributeColumn {
    header: String,
    key: String,
}

/// En-tête libre pour une clé qui serait relue comme géométrie (`attr_<clé>`)
fn renamed_header(key: &str, columns: &[AttributeColumn], keys: &[&str]) -> String {
    let taken = |candidate: &str| {
        is_reserved(candidate)
            || columns.iter().any(|c| c.header.eq_ignore_ascii_case(candidate))
            || keys.iter().any(|k| k.eq_ignore_ascii_case(candidate))
    };
    let base = format!("attr_{}", key);
    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

fn attribute_columns(records: &[&GeometryRecord]) -> Vec<AttributeColumn> {
    let mut columns: Vec<AttributeColumn> = WELL_KNOWN_ORDER
        .iter()
        .map(WellKnown::key)
        .filter(|key| records.iter().any(|r| r.attributes.contains_key(key)))
        .map(|key| AttributeColumn {
            header: key.to_string(),
            key: key.to_string(),
        })
        .collect();

    let mut keys: Vec<&str> = Vec::new();
    for record in records {
        for key in record.attributes.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    for &key in &keys {
        if columns.iter().any(|c| c.key == key) {
            continue;
        }
        let header = if is_reserved(key) {
            let header = renamed_header(key, &columns, &keys);
            debug!(key, column = %header, "Attribute renamed to avoid a geometry column");
            header
        } else {
            key.to_string()
        };
        columns.push(AttributeColumn {
            header,
            key: key.to_string(),
        });
    }
    columns
}

/// Exporte des enregistrements en CSV (en-tête + une ligne par enregistrement)
pub fn export<'a, I>(records: I) -> Result<Vec<u8>, GeoSurveyError>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let records: Vec<&GeometryRecord> = records.into_iter().collect();
    let columns = attribute_columns(&records);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns.iter().map(|c| c.header.as_str()).chain(GEOMETRY_COLUMNS))?;

    for record in &records {
        let mut row: Vec<String> = columns
            .iter()
            .map(|c| {
                record
                    .attributes
                    .get(&c.key)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            })
            .collect();

        let (latitude, longitude) = match &record.geometry {
            Geometry::Point(p) => (p.y().to_string(), p.x().to_string()),
            _ => (String::new(), String::new()),
        };
        let optional = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();

        row.push(record.kind().to_string());
        row.push(latitude);
        row.push(longitude);
        row.push(record.geometry.coordinates_json().to_string());
        row.push(optional(record.altitude));
        row.push(optional(record.area_hectares));
        row.push(optional(record.area_sqm));

        writer.write_record(&row)?;
    }

    debug!(rows = records.len(), columns = columns.len(), "CSV written");
    writer
        .into_inner()
        .map_err(|e| GeoSurveyError::Csv(e.to_string()))
}
