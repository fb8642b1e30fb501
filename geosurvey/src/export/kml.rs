//! Export vers KML 2.2
//!
//! Un placemark par enregistrement. `name` et `description` utilisent leurs
//! éléments natifs; tous les autres attributs vont dans `ExtendedData`.

use geo::Coord;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::debug;

use crate::types::{Geometry, GeometryRecord, WellKnown};
use crate::GeoSurveyError;

/// Namespace KML 2.2
pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

type XmlWriter = Writer<Vec<u8>>;

/// Exporte des enregistrements en document KML
pub fn export<'a, I>(records: I, document_name: &str) -> Result<Vec<u8>, GeoSurveyError>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut kml = BytesStart::new("kml");
    kml.push_attribute(("xmlns", KML_NAMESPACE));
    writer.write_event(Event::Start(kml))?;
    start(&mut writer, "Document")?;
    if !document_name.is_empty() {
        text_element(&mut writer, "name", document_name)?;
    }

    let mut count = 0;
    for record in records {
        write_placemark(&mut writer, record)?;
        count += 1;
    }

    end(&mut writer, "Document")?;
    end(&mut writer, "kml")?;

    debug!(placemarks = count, "KML written");
    Ok(writer.into_inner())
}

fn start(writer: &mut XmlWriter, name: &str) -> Result<(), GeoSurveyError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end(writer: &mut XmlWriter, name: &str) -> Result<(), GeoSurveyError> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), GeoSurveyError> {
    start(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

fn write_placemark(writer: &mut XmlWriter, record: &GeometryRecord) -> Result<(), GeoSurveyError> {
    start(writer, "Placemark")?;

    if let Some(name) = record.name() {
        text_element(writer, "name", name)?;
    }
    if let Some(description) = record.description() {
        text_element(writer, "description", description)?;
    }

    // kitta_no et owner_name d'abord, puis les autres attributs dans l'ordre
    let mut extended: Vec<(&str, String)> = Vec::new();
    for field in [WellKnown::ParcelId, WellKnown::Owner] {
        if let Some(value) = record.well_known(field) {
            extended.push((field.key(), value.to_string()));
        }
    }
    for (key, value) in record.attributes.iter() {
        if !WellKnown::is_well_known_key(key) {
            extended.push((key, value.to_string()));
        }
    }

    if !extended.is_empty() {
        start(writer, "ExtendedData")?;
        for (key, value) in extended {
            let mut data = BytesStart::new("Data");
            data.push_attribute(("name", key));
            writer.write_event(Event::Start(data))?;
            text_element(writer, "value", &value)?;
            end(writer, "Data")?;
        }
        end(writer, "ExtendedData")?;
    }

    write_geometry(writer, &record.geometry, record.altitude)?;
    end(writer, "Placemark")
}

fn write_geometry(
    writer: &mut XmlWriter,
    geometry: &Geometry,
    altitude: Option<f64>,
) -> Result<(), GeoSurveyError> {
    let coordinates = format_coordinates(&geometry.coords(), altitude);
    match geometry {
        Geometry::Point(_) => {
            start(writer, "Point")?;
            text_element(writer, "coordinates", &coordinates)?;
            end(writer, "Point")
        }
        Geometry::LineString(_) => {
            start(writer, "LineString")?;
            text_element(writer, "coordinates", &coordinates)?;
            end(writer, "LineString")
        }
        Geometry::Polygon(_) => {
            start(writer, "Polygon")?;
            start(writer, "outerBoundaryIs")?;
            start(writer, "LinearRing")?;
            text_element(writer, "coordinates", &coordinates)?;
            end(writer, "LinearRing")?;
            end(writer, "outerBoundaryIs")?;
            end(writer, "Polygon")
        }
    }
}

/// Tuples `lon,lat[,alt]` séparés par des espaces
fn format_coordinates(coords: &[Coord], altitude: Option<f64>) -> String {
    coords
        .iter()
        .map(|c| match altitude {
            Some(alt) => format!("{},{},{}", c.x, c.y, alt),
            None => format!("{},{}", c.x, c.y),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::kml as kml_parser;
    use crate::types::{Attributes, SourceFormat};

    fn record(geometry: Geometry, attrs: &[(&str, &str)]) -> GeometryRecord {
        let attributes: Attributes = attrs.iter().copied().collect();
        GeometryRecord::new(geometry, attributes, SourceFormat::Csv)
    }

    #[test]
    fn test_document_structure() {
        let records = vec![record(
            Geometry::point(85.324, 27.7172),
            &[("name", "A & B"), ("kitta_no", "12345"), ("ward", "4")],
        )];
        let xml = String::from_utf8(export(&records, "Survey").unwrap()).unwrap();

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(KML_NAMESPACE));
        assert!(xml.contains("<name>A &amp; B</name>"));
        assert!(xml.contains(r#"<Data name="kitta_no">"#));
        assert!(xml.contains(r#"<Data name="ward">"#));
        assert!(xml.contains("<coordinates>85.324,27.7172</coordinates>"));
        assert!(!xml.contains(r#"<Data name="name">"#));
    }

    #[test]
    fn test_round_trip_well_known() {
        let ring = vec![
            Coord { x: 85.0, y: 27.0 },
            Coord { x: 85.01, y: 27.0 },
            Coord { x: 85.01, y: 27.01 },
            Coord { x: 85.0, y: 27.01 },
        ];
        let records = vec![
            record(
                Geometry::point(85.324, 27.7172),
                &[("name", "Plot 1"), ("kitta_no", "12345"), ("owner_name", "John Doe")],
            ),
            record(
                Geometry::polygon(ring).unwrap(),
                &[("name", "Field"), ("description", "Rice field near river")],
            ),
            record(
                Geometry::line_string(vec![Coord { x: 85.0, y: 27.0 }, Coord { x: 85.2, y: 27.3 }])
                    .unwrap(),
                &[("name", "Track")],
            ),
        ];

        let bytes = export(&records, "Survey").unwrap();
        let parsed = kml_parser::parse(&bytes).unwrap();
        assert!(parsed.per_record_errors.is_empty());
        assert_eq!(parsed.records.len(), records.len());

        for (original, back) in records.iter().zip(&parsed.records) {
            assert_eq!(original.geometry, back.geometry);
            for field in WellKnown::ALL {
                assert_eq!(original.well_known(field), back.well_known(field), "{:?}", field);
            }
        }
    }

    #[test]
    fn test_altitude_written() {
        let r = record(Geometry::point(85.0, 27.0), &[]).with_altitude(Some(1400.0));
        let xml = String::from_utf8(export([&r], "").unwrap()).unwrap();
        assert!(xml.contains("<coordinates>85,27,1400</coordinates>"));

        let back = kml_parser::parse(xml.as_bytes()).unwrap();
        assert_eq!(back.records[0].altitude, Some(1400.0));
    }
}
