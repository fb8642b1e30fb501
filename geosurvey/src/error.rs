//! Types d'erreurs pour le crate geosurvey

use thiserror::Error;

use crate::types::SourceFormat;

/// Erreurs fatales pour un fichier (le pipeline de ce fichier est abandonné)
#[derive(Debug, Error)]
pub enum GeoSurveyError {
    /// Le détecteur n'a reconnu aucun format supporté
    #[error("Unsupported format: {filename}")]
    UnsupportedFormat { filename: String },

    /// Échec des contrôles structurels, avec la liste des raisons
    #[error("Validation failed: {}", reasons.join("; "))]
    ValidationFailed { reasons: Vec<String> },

    /// Document racine illisible: tout le fichier est rejeté
    #[error("Fatal parse error in {format} input: {reason}")]
    FatalParse {
        format: SourceFormat,
        reason: String,
    },

    /// Précondition d'export non respectée (ex: types de géométrie mélangés)
    #[error("Export precondition failed: {0}")]
    ExportPrecondition(String),

    /// Erreur d'I/O (fichiers temporaires, écriture)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive ZIP illisible ou impossible à écrire
    #[error("Zip archive error: {0}")]
    Zip(String),

    /// Erreur du lecteur/écrivain CSV
    #[error("CSV error: {0}")]
    Csv(String),

    /// Erreur d'écriture XML
    #[error("XML error: {0}")]
    Xml(String),

    /// Erreur de la bibliothèque shapefile/dbase
    #[error("Shapefile error: {0}")]
    Shapefile(String),

    /// Erreur d'encodage d'une géométrie ou de propriétés (WKT, GeoJSON)
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl GeoSurveyError {
    /// Crée une erreur de parsing fatale avec contexte
    pub fn fatal(format: SourceFormat, reason: impl Into<String>) -> Self {
        Self::FatalParse {
            format,
            reason: reason.into(),
        }
    }

    /// Crée une erreur de validation à une seule raison
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reasons: vec![reason.into()],
        }
    }

    /// Indique si l'erreur provient de l'entrée elle-même (jamais à réessayer)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. } | Self::ValidationFailed { .. } | Self::FatalParse { .. }
        )
    }
}

impl From<zip::result::ZipError> for GeoSurveyError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Zip(e.to_string())
    }
}

impl From<csv::Error> for GeoSurveyError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<quick_xml::Error> for GeoSurveyError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

impl From<shapefile::Error> for GeoSurveyError {
    fn from(e: shapefile::Error) -> Self {
        Self::Shapefile(e.to_string())
    }
}

impl From<geozero::error::GeozeroError> for GeoSurveyError {
    fn from(e: geozero::error::GeozeroError) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for GeoSurveyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

/// Enregistrement ignoré: le lot continue, la raison est conservée pour l'appelant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {index}: {reason}")]
pub struct RecordError {
    /// Position de l'enregistrement dans la source (placemark, ligne, feature)
    pub index: usize,
    /// Raison lisible
    pub reason: String,
}

impl RecordError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_lists_reasons() {
        let err = GeoSurveyError::ValidationFailed {
            reasons: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(err.to_string(), "Validation failed: first; second");
        assert!(err.is_input_error());
    }

    #[test]
    fn test_fatal_parse_mentions_format() {
        let err = GeoSurveyError::fatal(SourceFormat::Kml, "unexpected end of document");
        assert!(err.to_string().contains("KML"));
        assert!(err.to_string().contains("unexpected end"));
    }

    #[test]
    fn test_record_error_display() {
        let err = RecordError::new(3, "longitude out of range");
        assert_eq!(err.to_string(), "record 3: longitude out of range");
    }

    #[test]
    fn test_io_is_not_input_error() {
        let err = GeoSurveyError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!err.is_input_error());
    }
}
