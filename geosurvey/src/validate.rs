//! Validation structurelle avant parsing
//!
//! Contrôles par format et limites de taille. Les coordonnées ne sont jamais
//! inspectées ici et le buffer n'est jamais modifié.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive;
use crate::detect::FormatKind;
use crate::parser::xml;
use crate::GeoSurveyError;

const MIB: u64 = 1024 * 1024;

/// Code de fichier en tête d'un .shp (big-endian)
const SHP_FILE_CODE: [u8; 4] = [0x00, 0x00, 0x27, 0x0A];

/// Taille maximale par format, en octets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeLimits {
    pub kml: u64,
    pub csv: u64,
    pub shapefile: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            kml: 50 * MIB,
            csv: 100 * MIB,
            shapefile: 200 * MIB,
        }
    }
}

impl SizeLimits {
    /// Limite pour un format (None pour `Unknown`)
    pub fn max_for(&self, kind: FormatKind) -> Option<u64> {
        match kind {
            FormatKind::Kml => Some(self.kml),
            FormatKind::Csv => Some(self.csv),
            FormatKind::Shapefile => Some(self.shapefile),
            FormatKind::Unknown => None,
        }
    }
}

/// Résultat de validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Convertit en `ValidationFailed` si invalide
    pub fn into_result(self) -> Result<(), GeoSurveyError> {
        if self.valid {
            Ok(())
        } else {
            Err(GeoSurveyError::ValidationFailed {
                reasons: self.errors,
            })
        }
    }
}

/// Valide un buffer pour le format détecté
///
/// `declared_size` est la taille annoncée par l'appelant; la plus grande des
/// deux (annoncée, réelle) est comparée à la limite.
pub fn validate(
    kind: FormatKind,
    buffer: &[u8],
    declared_size: u64,
    limits: &SizeLimits,
) -> Validation {
    let Some(max) = limits.max_for(kind) else {
        return Validation::from_errors(vec!["Unsupported file format".to_string()]);
    };

    let mut errors = Vec::new();

    let size = declared_size.max(buffer.len() as u64);
    if size > max {
        errors.push(format!(
            "File size ({:.1} MB) exceeds maximum allowed size ({} MB)",
            size as f64 / MIB as f64,
            max / MIB
        ));
    }

    if buffer.is_empty() {
        errors.push("File is empty".to_string());
    } else {
        match kind {
            FormatKind::Kml => check_kml(buffer, &mut errors),
            FormatKind::Csv => check_csv(buffer, &mut errors),
            FormatKind::Shapefile => check_shapefile(buffer, &mut errors),
            FormatKind::Unknown => {}
        }
    }

    debug!(?kind, size, errors = errors.len(), "Validation done");
    Validation::from_errors(errors)
}

fn check_kml(buffer: &[u8], errors: &mut Vec<String>) {
    let content = String::from_utf8_lossy(buffer);
    match xml::parse_document(content.trim_start_matches('\u{feff}')) {
        Ok(root) => {
            if root.local != "kml" {
                errors.push(format!(
                    "Invalid KML file: root element is <{}>, expected <kml>",
                    root.name
                ));
            }
            if root.find("Placemark").is_none() {
                errors.push("KML file contains no placemarks".to_string());
            }
        }
        Err(reason) => errors.push(format!("Invalid KML file: XML parsing error ({})", reason)),
    }
}

/// Seul l'en-tête doit être lisible: l'encodage des lignes relève du parser
fn check_csv(buffer: &[u8], errors: &mut Vec<String>) {
    let mut lines = buffer
        .split(|b| *b == b'\n')
        .filter(|l| !l.trim_ascii().is_empty());

    match lines.next().map(simdutf8::basic::from_utf8) {
        Some(Ok(header)) if header.contains(',') => {}
        Some(Ok(_)) => errors.push("File does not appear to be comma-separated".to_string()),
        Some(Err(_)) => errors.push("CSV header row must be UTF-8 encoded".to_string()),
        None => {}
    }
    if lines.next().is_none() {
        errors.push("CSV file must contain at least header and one data row".to_string());
    }
}
