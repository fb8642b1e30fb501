//! Rapport de conversion avec graceful degradation
//!
//! Collecte, par fichier, les enregistrements lus et rejetés, les échecs de
//! fichier et les sorties écrites; affichage console et sauvegarde JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use geosurvey::{GeoSurveyError, ParseResult, SourceFormat};
use serde::Serialize;

/// Statut global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionStatus {
    /// Tous les fichiers et enregistrements traités
    Success,
    /// Des enregistrements ou des fichiers ont été ignorés
    PartialSuccess,
    /// Rien n'a pu être lu
    Failed,
}

/// Niveau de sévérité
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLevel {
    /// Fichier abandonné
    File,
    /// Enregistrement ignoré
    Record,
}

/// Erreur avec contexte
#[derive(Debug, Clone, Serialize)]
pub struct ConversionError {
    pub level: ErrorLevel,
    /// Fichier source
    pub file: String,
    /// Position de l'enregistrement dans la source
    pub record_index: Option<usize>,
    pub message: String,
}

/// Statistiques par format source
#[derive(Debug, Clone, Default, Serialize)]
pub struct FormatStats {
    pub files: usize,
    pub records: usize,
    pub skipped: usize,
}

/// Fichier de sortie écrit
#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub path: String,
    pub records: usize,
    /// blake3 du contenu écrit
    pub checksum: String,
}

/// Rapport complet
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    /// Commande exécutée (inspect, convert, merge)
    pub command: String,
    pub duration_secs: f64,
    pub status: ConversionStatus,

    pub files_processed: usize,
    pub files_failed: usize,
    pub records_read: usize,
    pub records_skipped: usize,
    pub records_written: usize,

    pub by_format: BTreeMap<String, FormatStats>,
    pub errors: Vec<ConversionError>,
    pub outputs: Vec<OutputFile>,
}

impl ConversionReport {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            duration_secs: 0.0,
            status: ConversionStatus::Success,
            files_processed: 0,
            files_failed: 0,
            records_read: 0,
            records_skipped: 0,
            records_written: 0,
            by_format: BTreeMap::new(),
            errors: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Enregistre un fichier parsé (les rejets par enregistrement sont conservés)
    pub fn record_file(&mut self, file: &str, format: SourceFormat, result: &ParseResult) {
        self.files_processed += 1;
        self.records_read += result.records.len();
        self.records_skipped += result.per_record_errors.len();

        let stats = self.by_format.entry(format.to_string()).or_default();
        stats.files += 1;
        stats.records += result.records.len();
        stats.skipped += result.per_record_errors.len();

        self.errors
            .extend(result.per_record_errors.iter().map(|e| ConversionError {
                level: ErrorLevel::Record,
                file: file.to_string(),
                record_index: Some(e.index),
                message: e.reason.clone(),
            }));
    }

    /// Enregistre un fichier abandonné
    pub fn record_file_failure(&mut self, file: &str, message: &str) {
        self.files_processed += 1;
        self.files_failed += 1;
        self.errors.push(ConversionError {
            level: ErrorLevel::File,
            file: file.to_string(),
            record_index: None,
            message: message.to_string(),
        });
    }

    /// Marque en échec un fichier déjà compté (ex: trop de rejets)
    pub fn reject_file(&mut self, file: &str, message: &str) {
        self.files_failed += 1;
        self.errors.push(ConversionError {
            level: ErrorLevel::File,
            file: file.to_string(),
            record_index: None,
            message: message.to_string(),
        });
    }

    /// Enregistre une erreur du pipeline pour un fichier
    pub fn record_error(&mut self, file: &str, error: &GeoSurveyError) {
        self.record_file_failure(file, &error.to_string());
    }

    /// Enregistre un fichier de sortie
    pub fn record_output(&mut self, path: &Path, records: usize, bytes: &[u8]) {
        self.records_written += records;
        self.outputs.push(OutputFile {
            path: path.display().to_string(),
            records,
            checksum: blake3::hash(bytes).to_hex().to_string(),
        });
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        let has_errors = !self.errors.is_empty();
        let all_failed = self.files_processed > 0 && self.files_failed == self.files_processed;

        self.status = if all_failed || (has_errors && self.records_read == 0) {
            ConversionStatus::Failed
        } else if has_errors {
            ConversionStatus::PartialSuccess
        } else {
            ConversionStatus::Success
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("CONVERSION REPORT - {}", self.command);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Files: {} processed, {} failed",
            self.files_processed, self.files_failed
        );
        println!(
            "Records: {} read, {} skipped, {} written",
            self.records_read, self.records_skipped, self.records_written
        );

        if !self.by_format.is_empty() {
            println!("\n--- BY FORMAT ---");
            for (format, stats) in &self.by_format {
                println!(
                    "  {}: {} files, {} records, {} skipped",
                    format, stats.files, stats.records, stats.skipped
                );
            }
        }

        if !self.outputs.is_empty() {
            println!("\n--- OUTPUTS ---");
            for output in &self.outputs {
                println!("  {} ({} records)", output.path, output.records);
            }
        }

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                let location = match e.record_index {
                    Some(index) => format!("[{}:{}]", e.file, index),
                    None => format!("[{}]", e.file),
                };
                println!("  {:?} {} {}", e.level, location, e.message);
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact
    pub fn summary(&self) -> String {
        format!(
            "{}: {} files ({} failed), {} records read, {} skipped, {} written",
            self.command,
            self.files_processed,
            self.files_failed,
            self.records_read,
            self.records_skipped,
            self.records_written
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosurvey::{Attributes, Geometry, GeometryRecord, RecordError};

    fn parsed(records: usize, errors: usize) -> ParseResult {
        ParseResult {
            records: (0..records)
                .map(|i| {
                    GeometryRecord::new(
                        Geometry::point(85.0 + i as f64 * 0.01, 27.0),
                        Attributes::new(),
                        SourceFormat::Csv,
                    )
                })
                .collect(),
            per_record_errors: (0..errors)
                .map(|i| RecordError::new(records + i, "latitude 95 out of range [-90, 90]"))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_report_default() {
        let mut report = ConversionReport::new("inspect");
        report.finalize();
        assert_eq!(report.status, ConversionStatus::Success);
        assert_eq!(report.files_processed, 0);
    }

    #[test]
    fn test_record_file() {
        let mut report = ConversionReport::new("convert");
        report.record_file("a.csv", SourceFormat::Csv, &parsed(3, 1));
        report.record_file("b.csv", SourceFormat::Csv, &parsed(2, 0));

        assert_eq!(report.records_read, 5);
        assert_eq!(report.records_skipped, 1);
        let stats = report.by_format.get("CSV").unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(report.errors[0].record_index, Some(3));
        assert_eq!(report.errors[0].level, ErrorLevel::Record);
    }

    #[test]
    fn test_finalize_partial_success() {
        let mut report = ConversionReport::new("convert");
        report.record_file("a.csv", SourceFormat::Csv, &parsed(3, 0));
        report.record_file_failure("b.bin", "Unsupported format: b.bin");
        report.finalize();
        assert_eq!(report.status, ConversionStatus::PartialSuccess);
    }

    #[test]
    fn test_finalize_failed() {
        let mut report = ConversionReport::new("convert");
        report.record_error(
            "b.bin",
            &GeoSurveyError::UnsupportedFormat {
                filename: "b.bin".to_string(),
            },
        );
        report.finalize();
        assert_eq!(report.status, ConversionStatus::Failed);
        assert!(report.errors[0].message.contains("Unsupported format"));
    }

    #[test]
    fn test_reject_counted_once() {
        let mut report = ConversionReport::new("convert");
        report.record_file("a.csv", SourceFormat::Csv, &parsed(1, 3));
        report.reject_file("a.csv", "record error ratio 0.75 exceeds maximum 0.10");
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.files_failed, 1);
        report.finalize();
        assert_eq!(report.status, ConversionStatus::Failed);
    }

    #[test]
    fn test_outputs_and_summary() {
        let mut report = ConversionReport::new("merge");
        report.record_output(Path::new("out/merged.geojson"), 4, b"{}");
        assert_eq!(report.records_written, 4);
        assert_eq!(report.outputs[0].checksum.len(), 64);
        assert!(report.summary().contains("4 written"));
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = ConversionReport::new("inspect");
        report.record_file("a.csv", SourceFormat::Csv, &parsed(1, 0));
        report.save_to_file(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["records_read"], 1);
        assert_eq!(json["status"], "Success");
    }
}
