//! Export vers GeoJSON avec geozero (streaming)
//!
//! Un enregistrement dont la géométrie ne passe pas la validation lon/lat
//! n'est jamais écrit.

use std::collections::HashSet;
use std::io::Write;

use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::calc;
use crate::types::{AttributeValue, GeometryRecord};
use crate::GeoSurveyError;

/// Identifiants de features: l'empreinte de la géométrie, suffixée par la
/// position de la feature quand la même géométrie revient
#[derive(Debug, Default)]
struct FeatureIds {
    seen: HashSet<String>,
}

impl FeatureIds {
    fn assign(&mut self, record: &GeometryRecord, position: usize) -> String {
        let fingerprint = record.fingerprint();
        if self.seen.insert(fingerprint.clone()) {
            return fingerprint;
        }
        let id = format!("{}-{}", fingerprint, position);
        self.seen.insert(id.clone());
        id
    }
}

/// Exporte en `FeatureCollection` dans un buffer
pub fn export<'a, I>(records: I) -> Result<Vec<u8>, GeoSurveyError>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let mut buffer = Vec::new();
    write(&mut buffer, records)?;
    Ok(buffer)
}

/// Écrit une `FeatureCollection`; retourne le nombre de features écrites
pub fn write<'a, W, I>(writer: &mut W, records: I) -> Result<usize, GeoSurveyError>
where
    W: Write,
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    write!(writer, r#"{{"type":"FeatureCollection","features":["#)?;

    let mut ids = FeatureIds::default();
    let mut written = 0;
    let mut excluded = 0;
    for record in records {
        if let Err(reason) = record.geometry.validate() {
            warn!(reason = %reason, "Record excluded from GeoJSON");
            excluded += 1;
            continue;
        }
        if written > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, record, &ids.assign(record, written))?;
        written += 1;
    }

    write!(writer, "]}}")?;
    writer.flush()?;

    debug!(written, excluded, "GeoJSON written");
    Ok(written)
}

/// Écrit une feature
fn write_feature<W: Write>(
    writer: &mut W,
    record: &GeometryRecord,
    id: &str,
) -> Result<(), GeoSurveyError> {
    write!(writer, r#"{{"type":"Feature","id":"{}","#, id)?;

    // Géométrie via geozero
    write!(writer, r#""geometry":"#)?;
    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    record.geometry.to_geo().process_geom(&mut geom_writer)?;
    writer.write_all(&geom_buf)?;

    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, &properties(record))?;
    write!(writer, "}}")?;

    Ok(())
}

fn json_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(s) => Value::String(s.clone()),
        AttributeValue::Integer(i) => Value::from(*i),
        AttributeValue::Number(n) => Value::from(*n),
        AttributeValue::Boolean(b) => Value::Bool(*b),
    }
}

/// Propriétés d'une feature: attributs, puis surface, altitude et format source
pub fn properties(record: &GeometryRecord) -> Map<String, Value> {
    let mut props: Map<String, Value> = record
        .attributes
        .iter()
        .map(|(k, v)| (k.to_string(), json_value(v)))
        .collect();

    let mut derived = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            props.entry(key).or_insert(value);
        }
    };
    derived("area_hectares", record.area_hectares.map(Value::from));
    derived("area_sqm", record.area_sqm.map(Value::from));
    derived("altitude", record.altitude.map(Value::from));
    derived(
        "source_format",
        Some(Value::from(record.source_format.as_str())),
    );

    props
}

/// Construit une `FeatureCollection` typée (crate geojson), avec bbox
pub fn to_feature_collection<'a, I>(records: I) -> geojson::FeatureCollection
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let included: Vec<&GeometryRecord> = records
        .into_iter()
        .filter(|r| r.geometry.validate().is_ok())
        .collect();

    let mut ids = FeatureIds::default();
    let features = included
        .iter()
        .enumerate()
        .map(|(position, record)| geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(
                &record.geometry.to_geo(),
            ))),
            id: Some(geojson::feature::Id::String(ids.assign(record, position))),
            properties: Some(properties(record)),
            foreign_members: None,
        })
        .collect();

    geojson::FeatureCollection {
        bbox: calc::collection_bounds(included.iter().copied()).map(|b| b.to_array().to_vec()),
        features,
        foreign_members: None,
    }
}
