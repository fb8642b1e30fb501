//! Détection du format d'un fichier entrant
//!
//! L'extension du nom de fichier est prioritaire; à défaut, le contenu
//! (premier Ko) est inspecté: signature ZIP, puis déclaration XML + `kml`,
//! puis virgule + fin de ligne pour le CSV.

use std::path::Path;

use memchr::memmem;

use crate::types::SourceFormat;
use crate::GeoSurveyError;

/// Taille de l'échantillon inspecté
pub const SNIFF_LEN: usize = 1024;

/// Signature d'un en-tête local ZIP (`PK\x03\x04`)
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Classification d'un fichier entrant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Kml,
    Csv,
    Shapefile,
    /// Classification terminale: le fichier n'est pas réessayé
    Unknown,
}

impl FormatKind {
    /// Format source correspondant (None pour `Unknown`)
    pub fn source_format(&self) -> Option<SourceFormat> {
        match self {
            Self::Kml => Some(SourceFormat::Kml),
            Self::Csv => Some(SourceFormat::Csv),
            Self::Shapefile => Some(SourceFormat::Shapefile),
            Self::Unknown => None,
        }
    }

    /// Format source, ou `UnsupportedFormat`
    pub fn require(&self, filename: &str) -> Result<SourceFormat, GeoSurveyError> {
        self.source_format()
            .ok_or_else(|| GeoSurveyError::UnsupportedFormat {
                filename: filename.to_string(),
            })
    }
}

impl From<SourceFormat> for FormatKind {
    fn from(format: SourceFormat) -> Self {
        match format {
            SourceFormat::Kml => Self::Kml,
            SourceFormat::Csv => Self::Csv,
            SourceFormat::Shapefile => Self::Shapefile,
        }
    }
}

/// Classe un buffer (seul le premier Ko est lu) et son nom de fichier
pub fn detect(buffer: &[u8], filename: &str) -> FormatKind {
    if let Some(kind) = detect_by_extension(filename) {
        return kind;
    }

    detect_by_content(&buffer[..buffer.len().min(SNIFF_LEN)])
}

/// Détection par extension (insensible à la casse)
pub fn detect_by_extension(filename: &str) -> Option<FormatKind> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    match extension.as_str() {
        "kml" => Some(FormatKind::Kml),
        "csv" => Some(FormatKind::Csv),
        "shp" | "zip" => Some(FormatKind::Shapefile),
        _ => None,
    }
}

/// Détection par le contenu de l'échantillon
pub fn detect_by_content(sample: &[u8]) -> FormatKind {
    if sample.starts_with(ZIP_MAGIC) {
        return FormatKind::Shapefile;
    }

    let lower = sample.to_ascii_lowercase();
    if memmem::find(&lower, b"<?xml").is_some() && memmem::find(&lower, b"kml").is_some() {
        return FormatKind::Kml;
    }

    if memchr::memchr(b',', sample).is_some() && memchr::memchr(b'\n', sample).is_some() {
        return FormatKind::Csv;
    }

    FormatKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        assert_eq!(detect(b"PK\x03\x04", "survey.kml"), FormatKind::Kml);
        assert_eq!(detect(b"", "PARCELS.CSV"), FormatKind::Csv);
        assert_eq!(detect(b"", "bundle.zip"), FormatKind::Shapefile);
        assert_eq!(detect(b"", "layer.shp"), FormatKind::Shapefile);
    }

    #[test]
    fn test_sniff_zip() {
        assert_eq!(detect(b"PK\x03\x04rest", "upload"), FormatKind::Shapefile);
    }

    #[test]
    fn test_sniff_kml() {
        let data = br#"<?xml version="1.0" encoding="UTF-8"?><kml xmlns="http://www.opengis.net/kml/2.2">"#;
        assert_eq!(detect(data, "upload.dat"), FormatKind::Kml);
    }

    #[test]
    fn test_xml_without_kml_is_not_kml() {
        let data = br#"<?xml version="1.0"?><svg></svg>"#;
        assert_eq!(detect(data, "upload"), FormatKind::Unknown);
    }

    #[test]
    fn test_sniff_csv() {
        assert_eq!(detect(b"name,lat,lon\nA,1,2\n", "upload"), FormatKind::Csv);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(detect(b"%PDF-1.7", "report"), FormatKind::Unknown);
        assert!(FormatKind::Unknown.require("report").is_err());
    }

    #[test]
    fn test_sniff_only_first_kilobyte() {
        let mut data = vec![b' '; SNIFF_LEN];
        data.extend_from_slice(b"a,b\n");
        assert_eq!(detect(&data, "upload"), FormatKind::Unknown);
    }
}
