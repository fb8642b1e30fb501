//! Exporters: modèle canonique → flux d'octets (KML, CSV, Shapefile, GeoJSON)

pub mod csv;
pub mod geojson;
pub mod kml;
pub mod shapefile;

use std::fmt;
use std::str::FromStr;

use crate::types::GeometryRecord;
use crate::GeoSurveyError;

/// Format cible d'un export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Kml,
    Csv,
    Shapefile,
    GeoJson,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Kml,
        ExportFormat::Csv,
        ExportFormat::Shapefile,
        ExportFormat::GeoJson,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kml => "kml",
            Self::Csv => "csv",
            Self::Shapefile => "shapefile",
            Self::GeoJson => "geojson",
        }
    }

    /// Extension du fichier produit
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Kml => "kml",
            Self::Csv => "csv",
            Self::Shapefile => "zip",
            Self::GeoJson => "geojson",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kml" => Ok(Self::Kml),
            "csv" => Ok(Self::Csv),
            "shapefile" | "shp" | "zip" => Ok(Self::Shapefile),
            "geojson" | "json" => Ok(Self::GeoJson),
            _ => Err(format!(
                "Unknown export format: {}. Use: kml, csv, shapefile, geojson",
                s
            )),
        }
    }
}

/// Exporte des enregistrements vers le format demandé
///
/// `name` est le nom du document KML ou de la couche Shapefile.
pub fn export<'a, I>(records: I, format: ExportFormat, name: &str) -> Result<Vec<u8>, GeoSurveyError>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    match format {
        ExportFormat::Kml => self::kml::export(records, name),
        ExportFormat::Csv => self::csv::export(records),
        ExportFormat::Shapefile => self::shapefile::export(records, name),
        ExportFormat::GeoJson => self::geojson::export(records),
    }
}
