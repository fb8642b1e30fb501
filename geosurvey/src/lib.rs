//! # geosurvey
//!
//! Normalisation de fichiers de levés fonciers (KML, CSV, Shapefile zippé)
//! vers un modèle de géométrie canonique, et export vers KML, CSV, Shapefile
//! et GeoJSON.
//!
//! ## Features
//!
//! - Détection du format par extension puis par contenu
//! - Validation structurelle avant parsing (taille, racine `<kml>`, en-tête CSV, `.shp`)
//! - Erreurs par enregistrement accumulées sans interrompre le fichier
//! - Répertoire temporaire scopé pour l'extraction Shapefile (supprimé sur tous les chemins)
//! - Fusion multi-fichiers, filtres et dédoublonnage
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geosurvey::{process, ExportFormat, SizeLimits};
//!
//! let bytes = std::fs::read("parcels.kml")?;
//! let processed = process(&bytes, "parcels.kml", bytes.len() as u64, &SizeLimits::default())?;
//! println!("{}: {} records", processed.format, processed.result.records.len());
//!
//! let geojson = geosurvey::export::export(&processed.result.records, ExportFormat::GeoJson, "parcels")?;
//! ```

pub mod archive;
pub mod calc;
pub mod detect;
pub mod error;
pub mod export;
pub mod hash;
pub mod merge;
pub mod parser;
pub mod table;
pub mod types;
pub mod validate;

pub use detect::FormatKind;
pub use error::{GeoSurveyError, RecordError};
pub use export::ExportFormat;
pub use merge::{FilterPredicate, RecordSet};
pub use table::{ReportBundle, ReportTable};
pub use types::{
    AttributeValue, Attributes, Geometry, GeometryKind, GeometryRecord, ParseResult, SourceFormat,
    WellKnown,
};
pub use validate::SizeLimits;

use rayon::prelude::*;
use tracing::debug;

/// Fichier traité: format détecté et résultat du parsing
#[derive(Debug)]
pub struct ProcessedFile {
    pub format: SourceFormat,
    pub result: ParseResult,
}

/// Pipeline complet pour un fichier: détection → validation → parsing
///
/// # Errors
///
/// `UnsupportedFormat` si le format n'est pas reconnu, `ValidationFailed` si un
/// contrôle structurel échoue, `FatalParse` si le document est illisible.
/// Les enregistrements invalides sont dans `result.per_record_errors`.
pub fn process(
    bytes: &[u8],
    filename: &str,
    declared_size: u64,
    limits: &SizeLimits,
) -> Result<ProcessedFile, GeoSurveyError> {
    let kind = detect::detect(bytes, filename);
    let format = kind.require(filename)?;
    debug!(filename, %format, "Format detected");

    validate::validate(kind, bytes, declared_size, limits).into_result()?;

    let result = parser::parse_bytes(format, bytes)?;
    debug!(
        filename,
        records = result.records.len(),
        errors = result.per_record_errors.len(),
        "File processed"
    );
    Ok(ProcessedFile { format, result })
}

/// Entrée d'un traitement par lot
#[derive(Debug, Clone, Copy)]
pub struct SurveyInput<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
    pub declared_size: u64,
}

impl<'a> SurveyInput<'a> {
    pub fn new(filename: &'a str, bytes: &'a [u8]) -> Self {
        Self {
            filename,
            bytes,
            declared_size: bytes.len() as u64,
        }
    }
}

/// Traite des fichiers indépendants en parallèle; résultats dans l'ordre d'entrée
pub fn process_batch(
    inputs: &[SurveyInput<'_>],
    limits: &SizeLimits,
) -> Vec<Result<ProcessedFile, GeoSurveyError>> {
    inputs
        .par_iter()
        .map(|input| process(input.bytes, input.filename, input.declared_size, limits))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><Placemark>
  <name>Plot</name>
  <ExtendedData><Data name="kitta_no"><value>12345</value></Data></ExtendedData>
  <Point><coordinates>85.3240,27.7172</coordinates></Point>
</Placemark></Document></kml>"#;

    #[test]
    fn test_process_kml() {
        let processed = process(
            POINT_KML.as_bytes(),
            "plot.kml",
            POINT_KML.len() as u64,
            &SizeLimits::default(),
        )
        .unwrap();
        assert_eq!(processed.format, SourceFormat::Kml);
        assert_eq!(processed.result.records.len(), 1);
        assert_eq!(processed.result.records[0].parcel_id(), Some("12345"));
    }

    #[test]
    fn test_process_unsupported() {
        let err = process(b"\x00\x01\x02", "blob.bin", 3, &SizeLimits::default()).unwrap_err();
        assert!(matches!(err, GeoSurveyError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_process_declared_size_too_large() {
        let limits = SizeLimits {
            kml: 10,
            ..SizeLimits::default()
        };
        let err = process(POINT_KML.as_bytes(), "plot.kml", 5, &limits).unwrap_err();
        let GeoSurveyError::ValidationFailed { reasons } = err else {
            panic!("expected ValidationFailed");
        };
        assert!(reasons[0].contains("exceeds maximum allowed size"));
    }

    #[test]
    fn test_batch_keeps_order() {
        let csv = b"name,lat,lon\nA,27.7172,85.3240\n";
        let inputs = [
            SurveyInput::new("a.csv", csv),
            SurveyInput::new("b.bin", b"\x00\x01"),
            SurveyInput::new("c.kml", POINT_KML.as_bytes()),
        ];
        let results = process_batch(&inputs, &SizeLimits::default());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().format, SourceFormat::Csv);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().format, SourceFormat::Kml);
    }
}
