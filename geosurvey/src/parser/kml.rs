//! Parser KML (placemarks)
//!
//! Chaque placemark donne au plus un enregistrement. Un document illisible
//! est fatal; un placemark invalide est une erreur d'enregistrement.

use geo::Coord;
use tracing::{debug, warn};

use super::metadata;
use super::xml::{self, XmlElement};
use super::{accept_pairs, SurveyParser};
use crate::error::RecordError;
use crate::types::{
    Attributes, Geometry, GeometryKind, GeometryRecord, ParseResult, SourceFormat, WellKnown,
};
use crate::GeoSurveyError;

/// Parser KML 2.2 (préfixe de namespace toléré)
#[derive(Debug, Default, Clone, Copy)]
pub struct KmlParser;

impl SurveyParser for KmlParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Kml
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
        parse(bytes)
    }
}

/// Parse un document KML complet
pub fn parse(bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
    let content = String::from_utf8_lossy(bytes);
    let root = xml::parse_document(content.trim_start_matches('\u{feff}'))
        .map_err(|reason| GeoSurveyError::fatal(SourceFormat::Kml, reason))?;

    let placemarks = root.descendants_named("Placemark");
    debug!(count = placemarks.len(), "Placemarks found");

    let mut result = ParseResult::default();
    result
        .format_metadata
        .insert("crs".to_string(), "WGS 84".to_string());
    result
        .format_metadata
        .insert("crs_epsg".to_string(), "4326".to_string());
    if let Some(name) = root.find("Document").and_then(|d| d.child_text("name")) {
        result.format_metadata.insert("document_name".to_string(), name);
    }

    for (index, placemark) in placemarks.into_iter().enumerate() {
        match parse_placemark(index, placemark) {
            Ok(record) => result.records.push(record),
            Err(e) => {
                warn!(index = e.index, reason = %e.reason, "Placemark skipped");
                result.per_record_errors.push(e);
            }
        }
    }

    debug!(
        records = result.records.len(),
        errors = result.per_record_errors.len(),
        "KML parsed"
    );
    Ok(result)
}

fn parse_placemark(index: usize, placemark: &XmlElement) -> Result<GeometryRecord, RecordError> {
    let (geometry, geometry_element, altitude) =
        extract_geometry(placemark).map_err(|reason| RecordError::new(index, reason))?;

    let mut attributes = Attributes::new();

    let name = placemark.child_text("name");
    if let Some(name) = &name {
        attributes.insert(WellKnown::Name.key(), name.as_str());
    }

    let raw_description = placemark.child_text("description");
    let extraction = raw_description
        .as_deref()
        .map(metadata::extraction_text)
        .unwrap_or_default();
    if let Some(raw) = &raw_description {
        let cleaned = metadata::clean_markup(raw);
        if !cleaned.is_empty() {
            attributes.insert(WellKnown::Description.key(), cleaned);
        }
    }

    read_extended_data(placemark, &mut attributes);

    if !attributes.contains_key(WellKnown::ParcelId.key()) {
        if let Some(parcel) = metadata::extract_parcel_id(&extraction) {
            attributes.insert(WellKnown::ParcelId.key(), parcel);
        }
    }
    if !attributes.contains_key(WellKnown::Owner.key()) {
        let parcel = attributes.get_text(WellKnown::ParcelId.key()).map(str::to_string);
        if let Some(owner) = metadata::extract_owner(&extraction, parcel.as_deref(), name.as_deref())
        {
            attributes.insert(WellKnown::Owner.key(), owner);
        }
    }

    read_supplemental(placemark, geometry_element, &extraction, &mut attributes);

    Ok(GeometryRecord::new(geometry, attributes, SourceFormat::Kml).with_altitude(altitude))
}

/// Géométrie du placemark: Point, puis Polygon, puis LineString
fn extract_geometry(
    placemark: &XmlElement,
) -> Result<(Geometry, &XmlElement, Option<f64>), String> {
    if let Some(point) = placemark.find("Point") {
        let (coords, altitude) = read_coordinates(point, GeometryKind::Point)?;
        let geometry = Geometry::from_coords(GeometryKind::Point, coords)?;
        return Ok((geometry, point, altitude));
    }

    if let Some(polygon) = placemark.find("Polygon") {
        let outer = polygon
            .find("outerBoundaryIs")
            .ok_or_else(|| "Polygon has no outerBoundaryIs".to_string())?;
        let (coords, altitude) = read_coordinates(outer, GeometryKind::Polygon)?;
        let geometry = Geometry::from_coords(GeometryKind::Polygon, coords)?;
        return Ok((geometry, polygon, altitude));
    }

    if let Some(line) = placemark.find("LineString") {
        let (coords, altitude) = read_coordinates(line, GeometryKind::LineString)?;
        let geometry = Geometry::from_coords(GeometryKind::LineString, coords)?;
        return Ok((geometry, line, altitude));
    }

    Err("Placemark has no Point, Polygon or LineString geometry".to_string())
}

/// Lit et filtre les tuples `lon,lat[,alt]` du premier `<coordinates>`
fn read_coordinates(
    element: &XmlElement,
    kind: GeometryKind,
) -> Result<(Vec<Coord>, Option<f64>), String> {
    let text = element
        .find_text("coordinates")
        .ok_or_else(|| format!("{} has no coordinates", kind))?;

    let mut altitude = None;
    let mut candidates = Vec::new();
    let mut unreadable = Vec::new();

    for tuple in text.split_whitespace() {
        let mut parts = tuple.split(',').map(str::trim);
        let lon = parts.next().and_then(|p| fast_float::parse::<f64, _>(p).ok());
        let lat = parts.next().and_then(|p| fast_float::parse::<f64, _>(p).ok());
        match (lon, lat) {
            (Some(lon), Some(lat)) => {
                if altitude.is_none() {
                    altitude = parts.next().and_then(|p| fast_float::parse::<f64, _>(p).ok());
                }
                candidates.push(Coord { x: lon, y: lat });
            }
            _ => unreadable.push(format!("unreadable coordinate tuple '{}'", tuple)),
        }
    }

    let (accepted, mut rejected) = accept_pairs(candidates);
    rejected.extend(unreadable);

    // Un anneau fermé compte son couple de fermeture une seule fois
    let distinct = match kind {
        GeometryKind::Polygon if accepted.len() > 1 && accepted.first() == accepted.last() => {
            accepted.len() - 1
        }
        _ => accepted.len(),
    };

    let enough = match kind {
        GeometryKind::Point => distinct == 1,
        _ => distinct >= kind.min_coords(),
    };
    if !enough {
        let mut reason = format!(
            "{} needs {} accepted coordinate pair(s), got {}",
            kind,
            if kind == GeometryKind::Point {
                "exactly 1".to_string()
            } else {
                format!("at least {}", kind.min_coords())
            },
            distinct
        );
        if !rejected.is_empty() {
            reason.push_str(&format!(" ({})", rejected.join(", ")));
        }
        return Err(reason);
    }

    if !rejected.is_empty() {
        warn!(dropped = rejected.len(), reasons = ?rejected, "Coordinate pairs dropped");
    }

    Ok((accepted, altitude))
}

/// ExtendedData: `Data/value` et `SchemaData/SimpleData`
fn read_extended_data(placemark: &XmlElement, attributes: &mut Attributes) {
    let Some(extended) = placemark.child("ExtendedData") else {
        return;
    };

    let mut pairs = Vec::new();
    for data in extended.descendants_named("Data") {
        if let Some(key) = data.attribute("name") {
            let value = data.child_text("value").unwrap_or_default();
            pairs.push((key.to_string(), value));
        }
    }
    for simple in extended.descendants_named("SimpleData") {
        if let Some(key) = simple.attribute("name") {
            pairs.push((key.to_string(), simple.trimmed_text().to_string()));
        }
    }

    for (key, value) in pairs {
        let value = metadata::clean_markup(&value);
        if key.is_empty() || value.is_empty() {
            continue;
        }

        let lower = key.to_lowercase();
        if lower.contains("kitta") {
            attributes.insert_if_absent(WellKnown::ParcelId.key(), value.as_str());
        } else if lower.contains("owner") {
            attributes.insert_if_absent(WellKnown::Owner.key(), value.as_str());
        }
        attributes.insert_if_absent(key, value);
    }
}

/// Métadonnées complémentaires: temps, style, adresse, contact
fn read_supplemental(
    placemark: &XmlElement,
    geometry: &XmlElement,
    extraction: &str,
    attributes: &mut Attributes,
) {
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            attributes.insert_if_absent(key, value);
        }
    };

    if let Some(span) = placemark.child("TimeSpan") {
        put("time_begin", span.child_text("begin"));
        put("time_end", span.child_text("end"));
    }
    if let Some(stamp) = placemark.child("TimeStamp") {
        put("time_when", stamp.child_text("when"));
    }

    put("style_url", placemark.child_text("styleUrl"));
    put(
        "style_id",
        placemark
            .child("Style")
            .and_then(|s| s.attribute("id"))
            .map(str::to_string),
    );

    put("altitude_mode", geometry.find_text("altitudeMode"));
    put("tessellate", geometry.find_text("tessellate"));
    put("extrude", geometry.find_text("extrude"));

    put("address", placemark.child_text("address"));
    put("phone_number", placemark.child_text("phoneNumber"));
    put(
        "snippet",
        placemark
            .child_text("Snippet")
            .or_else(|| placemark.child_text("snippet")),
    );
    put("visibility", placemark.child_text("visibility"));
    put("open", placemark.child_text("open"));

    if let Some(details) = placemark.child("AddressDetails") {
        put("country_code", details.find_text("CountryNameCode"));
        put("administrative_area", details.find_text("AdministrativeAreaName"));
        put(
            "sub_administrative_area",
            details.find_text("SubAdministrativeAreaName"),
        );
        put("locality", details.find_text("LocalityName"));
        put("sub_locality", details.find_text("DependentLocalityName"));
        put("thoroughfare", details.find_text("ThoroughfareName"));
        put("postal_code", details.find_text("PostalCodeNumber"));
    }

    if let Some(author) = placemark.child("author") {
        put("atom_author", author.child_text("name"));
    }
    put(
        "atom_link",
        placemark
            .child("link")
            .and_then(|l| l.attribute("href"))
            .map(str::to_string),
    );

    put("phone_number", metadata::extract_phone(extraction));
    put("website", metadata::extract_website(extraction));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kml(placemarks: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><name>Survey</name>{}</Document></kml>"#,
            placemarks
        )
        .into_bytes()
    }

    #[test]
    fn test_point_with_extended_data() {
        let data = kml(
            r#"<Placemark><name>Plot</name>
            <ExtendedData><Data name="kitta_no"><value>12345</value></Data></ExtendedData>
            <Point><coordinates>85.3240,27.7172</coordinates></Point></Placemark>"#,
        );
        let result = parse(&data).unwrap();
        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.geometry, Geometry::point(85.3240, 27.7172));
        assert_eq!(record.parcel_id(), Some("12345"));
        assert_eq!(record.name(), Some("Plot"));
        assert_eq!(result.format_metadata.get("document_name").map(String::as_str), Some("Survey"));
    }

    #[test]
    fn test_longitude_out_of_range_is_record_error() {
        let data = kml(
            r#"<Placemark><name>Bad</name><Point><coordinates>200,27.7</coordinates></Point></Placemark>
            <Placemark><name>Good</name><Point><coordinates>85.3,27.7</coordinates></Point></Placemark>"#,
        );
        let result = parse(&data).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].name(), Some("Good"));
        assert_eq!(result.per_record_errors.len(), 1);
        assert_eq!(result.per_record_errors[0].index, 0);
        assert!(result.per_record_errors[0].reason.contains("longitude"));
    }

    #[test]
    fn test_altitude_kept_apart() {
        let data = kml(r#"<Placemark><Point><coordinates>85.3,27.7,1350</coordinates></Point></Placemark>"#);
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.geometry, Geometry::point(85.3, 27.7));
        assert_eq!(record.altitude, Some(1350.0));
    }

    #[test]
    fn test_polygon_outer_ring_only() {
        let data = kml(
            r#"<Placemark><Polygon>
              <outerBoundaryIs><LinearRing><coordinates>
                85.0,27.0,0 85.01,27.0,0 85.01,27.01,0 85.0,27.01,0 85.0,27.0,0
              </coordinates></LinearRing></outerBoundaryIs>
              <innerBoundaryIs><LinearRing><coordinates>
                85.002,27.002 85.003,27.002 85.003,27.003 85.002,27.002
              </coordinates></LinearRing></innerBoundaryIs>
            </Polygon></Placemark>"#,
        );
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.kind(), GeometryKind::Polygon);
        assert_eq!(record.geometry.coords().len(), 5);
        assert!(record.area_hectares.unwrap() > 0.0);
    }

    #[test]
    fn test_polygon_too_few_pairs() {
        let data = kml(
            r#"<Placemark><Polygon><outerBoundaryIs><LinearRing>
            <coordinates>85.0,27.0 85.1,27.0 85.0,27.0</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark>"#,
        );
        let result = parse(&data).unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.per_record_errors.len(), 1);
    }

    #[test]
    fn test_line_string() {
        let data = kml(r#"<Placemark><LineString><tessellate>1</tessellate><coordinates>85.0,27.0 85.1,27.1</coordinates></LineString></Placemark>"#);
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.kind(), GeometryKind::LineString);
        assert_eq!(record.attributes.get_text("tessellate"), Some("1"));
    }

    #[test]
    fn test_point_takes_priority() {
        let data = kml(
            r#"<Placemark><MultiGeometry>
            <LineString><coordinates>85.0,27.0 85.1,27.1</coordinates></LineString>
            <Point><coordinates>85.05,27.05</coordinates></Point>
            </MultiGeometry></Placemark>"#,
        );
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.kind(), GeometryKind::Point);
    }

    #[test]
    fn test_prefixed_namespace() {
        let data = br#"<kml:kml xmlns:kml="http://www.opengis.net/kml/2.2"><kml:Document>
        <kml:Placemark><kml:name>P</kml:name><kml:Point><kml:coordinates>85.3,27.7</kml:coordinates></kml:Point></kml:Placemark>
        </kml:Document></kml:kml>"#;
        let result = parse(data).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].name(), Some("P"));
    }

    #[test]
    fn test_description_regex_fallback() {
        let data = kml(
            r#"<Placemark><name>Field</name>
            <description><![CDATA[<p>Kitta Number: 778</p><p>Owner Name: Ram Bahadur</p><p>Phone: 01-5550123</p>]]></description>
            <Point><coordinates>85.3,27.7</coordinates></Point></Placemark>"#,
        );
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.parcel_id(), Some("778"));
        assert_eq!(record.owner(), Some("Ram Bahadur"));
        assert_eq!(record.attributes.get_text("phone_number"), Some("01-5550123"));
        let description = record.description().unwrap();
        assert!(!description.contains('<'));
        assert!(description.starts_with("Kitta Number: 778 Owner Name"));
    }

    #[test]
    fn test_extended_data_aliases_and_simple_data() {
        let data = kml(
            r##"<Placemark>
            <ExtendedData>
              <Data name="Kitta Number"><value>55</value></Data>
              <SchemaData schemaUrl="#s"><SimpleData name="Owner">Gita</SimpleData><SimpleData name="ward">4</SimpleData></SchemaData>
            </ExtendedData>
            <Point><coordinates>85.3,27.7</coordinates></Point></Placemark>"##,
        );
        let record = &parse(&data).unwrap().records[0];
        assert_eq!(record.parcel_id(), Some("55"));
        assert_eq!(record.owner(), Some("Gita"));
        assert_eq!(record.attributes.get_text("Kitta Number"), Some("55"));
        assert_eq!(record.attributes.get_text("ward"), Some("4"));
    }

    #[test]
    fn test_supplemental_metadata() {
        let data = kml(
            r##"<Placemark><styleUrl>#red</styleUrl>
            <TimeSpan><begin>2020-01-01</begin><end>2021-01-01</end></TimeSpan>
            <address>Kathmandu</address>
            <Point><altitudeMode>clampToGround</altitudeMode><coordinates>85.3,27.7</coordinates></Point></Placemark>"##,
        );
        let attrs = &parse(&data).unwrap().records[0].attributes;
        assert_eq!(attrs.get_text("style_url"), Some("#red"));
        assert_eq!(attrs.get_text("time_begin"), Some("2020-01-01"));
        assert_eq!(attrs.get_text("time_end"), Some("2021-01-01"));
        assert_eq!(attrs.get_text("address"), Some("Kathmandu"));
        assert_eq!(attrs.get_text("altitude_mode"), Some("clampToGround"));
    }

    #[test]
    fn test_no_geometry_is_record_error() {
        let data = kml("<Placemark><name>Empty</name></Placemark>");
        let result = parse(&data).unwrap();
        assert!(result.records.is_empty());
        assert!(result.per_record_errors[0].reason.contains("no Point"));
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        let err = parse(b"<kml><Document><Placemark></kml>").unwrap_err();
        assert!(matches!(err, GeoSurveyError::FatalParse { format: SourceFormat::Kml, .. }));
    }
}
