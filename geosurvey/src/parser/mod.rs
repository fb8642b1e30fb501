//! Parsers par format source
//!
//! Chaque parser implémente [`SurveyParser`]; la sélection se fait par un
//! `match` exhaustif sur [`SourceFormat`].

pub mod csv;
pub mod kml;
pub mod metadata;
pub mod shapefile;
pub mod xml;

use geo::Coord;

use crate::types::{check_lon_lat, ParseResult, SourceFormat};
use crate::GeoSurveyError;

pub use self::csv::CsvParser;
pub use self::kml::KmlParser;
pub use self::shapefile::ShapefileParser;

/// Conversion d'un format source vers le modèle canonique
pub trait SurveyParser: Sync {
    fn format(&self) -> SourceFormat;

    /// Parse un fichier complet. Les erreurs par enregistrement sont
    /// accumulées dans le résultat; seule une erreur de document est retournée.
    fn parse(&self, bytes: &[u8]) -> Result<ParseResult, GeoSurveyError>;
}

/// Parser associé à un format
pub fn parser_for(format: SourceFormat) -> &'static dyn SurveyParser {
    match format {
        SourceFormat::Kml => &KmlParser,
        SourceFormat::Csv => &CsvParser,
        SourceFormat::Shapefile => &ShapefileParser,
    }
}

/// Parse un buffer avec le parser du format donné
pub fn parse_bytes(format: SourceFormat, bytes: &[u8]) -> Result<ParseResult, GeoSurveyError> {
    parser_for(format).parse(bytes)
}

/// Sépare les couples dans les bornes lon/lat des couples rejetés (avec raison)
pub(crate) fn accept_pairs(candidates: Vec<Coord>) -> (Vec<Coord>, Vec<String>) {
    let mut accepted = Vec::with_capacity(candidates.len());
    let mut rejected = Vec::new();
    for coord in candidates {
        match check_lon_lat(coord) {
            Ok(()) => accepted.push(coord),
            Err(reason) => rejected.push(reason),
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_matches_format() {
        for format in [SourceFormat::Kml, SourceFormat::Csv, SourceFormat::Shapefile] {
            assert_eq!(parser_for(format).format(), format);
        }
    }

    #[test]
    fn test_accept_pairs() {
        let (ok, rejected) = accept_pairs(vec![
            Coord { x: 85.0, y: 27.0 },
            Coord { x: 200.0, y: 27.0 },
            Coord { x: 85.0, y: -95.0 },
        ]);
        assert_eq!(ok.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].contains("longitude"));
        assert!(rejected[1].contains("latitude"));
    }
}
