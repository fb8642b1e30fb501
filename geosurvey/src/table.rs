//! Table de lignes pour les rapports (une ligne par enregistrement)
//!
//! Le rendu (PDF, carte) est fait par l'appelant; l'image de carte éventuelle
//! est transportée telle quelle.

use geozero::ToWkt;
use serde::Serialize;

use crate::types::{GeometryRecord, WellKnown};
use crate::GeoSurveyError;

/// Colonnes de la table, dans l'ordre
pub const REPORT_COLUMNS: [&str; 10] = [
    "id",
    "name",
    "kitta_no",
    "owner_name",
    "description",
    "geometry_type",
    "area_hectares",
    "area_sqm",
    "source_format",
    "geometry_wkt",
];

/// Table plate: valeurs textuelles, cellule vide si absente
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    /// Construit la table depuis une sélection d'enregistrements
    pub fn from_records<'a, I>(records: I) -> Result<Self, GeoSurveyError>
    where
        I: IntoIterator<Item = &'a GeometryRecord>,
    {
        let rows = records
            .into_iter()
            .map(report_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns: REPORT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Valeur d'une cellule par nom de colonne
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Export CSV de la table (pour les outils de rendu tabulaire)
    pub fn to_csv(&self) -> Result<Vec<u8>, GeoSurveyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| GeoSurveyError::Csv(e.to_string()))
    }
}

fn report_row(record: &GeometryRecord) -> Result<Vec<String>, GeoSurveyError> {
    let text = |field: WellKnown| record.well_known(field).unwrap_or_default().to_string();
    let number = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_default();

    Ok(vec![
        record.fingerprint(),
        text(WellKnown::Name),
        text(WellKnown::ParcelId),
        text(WellKnown::Owner),
        text(WellKnown::Description),
        record.kind().to_string(),
        number(record.area_hectares),
        number(record.area_sqm),
        record.source_format.to_string(),
        record.geometry.to_geo().to_wkt()?,
    ])
}

/// Table accompagnée d'une image de carte pré-rendue (opaque)
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBundle {
    pub table: ReportTable,
    pub map_image: Option<Vec<u8>>,
}

impl ReportBundle {
    pub fn new(table: ReportTable) -> Self {
        Self {
            table,
            map_image: None,
        }
    }

    pub fn with_map_image(mut self, image: Vec<u8>) -> Self {
        self.map_image = Some(image);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, Geometry, SourceFormat};
    use geo::Coord;

    #[test]
    fn test_rows_and_columns() {
        let attributes: Attributes = [("name", "Plot"), ("kitta_no", "12345"), ("ward", "4")]
            .into_iter()
            .collect();
        let records = vec![GeometryRecord::new(
            Geometry::point(85.324, 27.7172),
            attributes,
            SourceFormat::Kml,
        )];
        let table = ReportTable::from_records(&records).unwrap();

        assert_eq!(table.columns.len(), REPORT_COLUMNS.len());
        assert_eq!(table.len(), 1);
        assert_eq!(table.cell(0, "kitta_no"), Some("12345"));
        assert_eq!(table.cell(0, "owner_name"), Some(""));
        assert_eq!(table.cell(0, "geometry_type"), Some("Point"));
        assert_eq!(table.cell(0, "source_format"), Some("KML"));
        let wkt = table.cell(0, "geometry_wkt").unwrap();
        assert!(wkt.starts_with("POINT"));
        assert!(wkt.contains("85.324 27.7172"));
        assert_eq!(table.cell(0, "id"), Some(records[0].fingerprint().as_str()));
        assert!(table.cell(0, "ward").is_none());
    }

    #[test]
    fn test_polygon_area_cells() {
        let ring = vec![
            Coord { x: 85.0, y: 27.0 },
            Coord { x: 85.01, y: 27.0 },
            Coord { x: 85.01, y: 27.01 },
        ];
        let record = GeometryRecord::new(Geometry::polygon(ring).unwrap(), Attributes::new(), SourceFormat::Csv);
        let table = ReportTable::from_records([&record]).unwrap();

        assert!(table.cell(0, "geometry_wkt").unwrap().starts_with("POLYGON"));
        let hectares: f64 = table.cell(0, "area_hectares").unwrap().parse().unwrap();
        assert!(hectares > 0.0);
    }

    #[test]
    fn test_bundle_carries_image() {
        let table = ReportTable::from_records(std::iter::empty()).unwrap();
        assert!(table.is_empty());
        let bundle = ReportBundle::new(table).with_map_image(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(bundle.map_image.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));

        let csv = String::from_utf8(bundle.table.to_csv().unwrap()).unwrap();
        assert!(csv.starts_with("id,name,kitta_no"));
    }
}
