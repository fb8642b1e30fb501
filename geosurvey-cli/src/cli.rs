//! Définition et implémentation des commandes CLI
//!
//! - `inspect`: détection + validation + parsing, rapport seulement
//! - `convert`: chaque fichier vers un format cible
//! - `merge`: plusieurs fichiers fusionnés, filtrés et dédoublonnés vers une sortie

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use geosurvey::export::{self, ExportFormat};
use geosurvey::merge::{self, FilterPredicate, RecordSet};
use geosurvey::{
    detect, GeoSurveyError, GeometryKind, GeometryRecord, ParseResult, ProcessedFile,
    ReportTable, SourceFormat,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::report::ConversionReport;

#[derive(Subcommand)]
pub enum Commands {
    /// Detect, validate and parse survey files, then print a report
    Inspect {
        /// Survey file (.kml, .csv, .zip, .shp) or directory
        #[arg(short, long)]
        path: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Convert each survey file to another format
    Convert {
        /// Survey file or directory
        #[arg(short, long)]
        path: PathBuf,

        /// Target format: kml, csv, shapefile, geojson
        #[arg(long)]
        to: ExportFormat,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Merge several survey files into one filtered, deduplicated output
    Merge {
        /// Survey files or directories
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,

        /// Target format: kml, csv, shapefile, geojson
        #[arg(long)]
        to: ExportFormat,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Base name of the merged output
        #[arg(long, default_value = "merged")]
        output_name: String,

        #[command(flatten)]
        filter: FilterArgs,

        /// Keep duplicate records
        #[arg(long)]
        no_dedup: bool,

        /// Also write the report row table as CSV
        #[arg(long)]
        table: bool,

        #[command(flatten)]
        common: CommonArgs,
    },
}

/// Options communes
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Config preset name (default/strict) or path to a JSON config
    #[arg(long)]
    pub config: Option<String>,

    /// Save the conversion report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Filtres de la commande merge
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Record name contains (case-insensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Parcel number (kitta) contains
    #[arg(long)]
    pub kitta: Option<String>,

    /// Owner name contains (case-insensitive)
    #[arg(long)]
    pub owner: Option<String>,

    /// Minimum area in hectares
    #[arg(long)]
    pub min_area: Option<f64>,

    /// Maximum area in hectares
    #[arg(long)]
    pub max_area: Option<f64>,

    /// Geometry kind: point, linestring, polygon
    #[arg(long)]
    pub kind: Option<GeometryKind>,
}

impl FilterArgs {
    /// Prédicat correspondant; `None` si aucun filtre n'est donné
    pub fn predicate(&self) -> Option<FilterPredicate> {
        let mut predicate = FilterPredicate::new();
        for (field, needle) in [
            ("name", &self.name),
            ("kitta_no", &self.kitta),
            ("owner_name", &self.owner),
        ] {
            if let Some(needle) = needle {
                predicate = predicate.contains(field, needle.as_str());
            }
        }
        predicate = predicate.area_hectares(self.min_area, self.max_area);
        if let Some(kind) = self.kind {
            predicate = predicate.kind(kind);
        }
        (!predicate.is_empty()).then_some(predicate)
    }
}

/// Fichier lu et traité
struct LoadedFile {
    name: String,
    outcome: Result<ProcessedFile, GeoSurveyError>,
}

/// Exécute la commande inspect
pub fn cmd_inspect(path: &Path, common: &CommonArgs) -> Result<()> {
    let start = Instant::now();
    let config = Config::resolve(common.config.as_deref())?;
    let mut report = ConversionReport::new("inspect");

    let files = load_files(&collect_inputs(path)?, &config);
    for (name, format, result) in accept_files(files, &config, &mut report) {
        let summary = result.summary();
        println!(
            "{}: {} ({} records, {} skipped, geometry {})",
            name,
            format,
            result.records.len(),
            result.per_record_errors.len(),
            summary.geometry_type.as_deref().unwrap_or("none")
        );
        if let Some(bounds) = summary.bounds {
            println!(
                "  bounds: [{}, {}, {}, {}]",
                bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
            );
        }
        for (key, value) in &result.format_metadata {
            println!("  {}: {}", key, value);
        }
    }

    finish(report, start, common)
}

/// Exécute la commande convert
pub fn cmd_convert(path: &Path, to: ExportFormat, output: &Path, common: &CommonArgs) -> Result<()> {
    let start = Instant::now();
    let config = Config::resolve(common.config.as_deref())?;
    let mut report = ConversionReport::new("convert");

    std::fs::create_dir_all(output)
        .with_context(|| format!("Cannot create output directory {}", output.display()))?;

    let files = load_files(&collect_inputs(path)?, &config);
    for (name, _, result) in accept_files(files, &config, &mut report) {
        let stem = file_stem(Path::new(&name));
        let records: Vec<&GeometryRecord> = result.records.iter().collect();
        if let Err(e) = write_export(&records, to, output, &stem, &mut report) {
            warn!(file = %name, error = %e, "Export failed");
            report.reject_file(&name, &format!("{:#}", e));
        }
    }

    println!(
        "Export complete: {} files to {} ({})",
        report.outputs.len(),
        output.display(),
        to
    );
    finish(report, start, common)
}

/// Exécute la commande merge
#[allow(clippy::too_many_arguments)]
pub fn cmd_merge(
    paths: &[PathBuf],
    to: ExportFormat,
    output: &Path,
    output_name: &str,
    filter: &FilterArgs,
    no_dedup: bool,
    table: bool,
    common: &CommonArgs,
) -> Result<()> {
    let start = Instant::now();
    let config = Config::resolve(common.config.as_deref())?;
    let mut report = ConversionReport::new("merge");

    std::fs::create_dir_all(output)
        .with_context(|| format!("Cannot create output directory {}", output.display()))?;

    let mut inputs = Vec::new();
    for path in paths {
        inputs.extend(collect_inputs(path)?);
    }
    let files = load_files(&inputs, &config);
    let accepted = accept_files(files, &config, &mut report);

    let set = RecordSet::merge(accepted.iter().map(|(name, _, result)| (name.as_str(), result)));
    let predicate = filter.predicate();
    let dedup = config.deduplicate && !no_dedup;
    let selection = set.select(predicate.as_ref(), dedup);
    info!(
        merged = set.len(),
        selected = selection.len(),
        dedup,
        "Records merged"
    );

    let records = merge::records(&selection);
    if records.is_empty() {
        warn!("No record left after filtering");
    } else {
        write_export(&records, to, output, output_name, &mut report)?;
    }

    if table {
        let table_path = output.join(format!("{}_table.csv", output_name));
        let bytes = ReportTable::from_records(records.iter().copied())?.to_csv()?;
        std::fs::write(&table_path, &bytes)
            .with_context(|| format!("Cannot write {}", table_path.display()))?;
        info!(path = %table_path.display(), "Report table written");
    }

    println!(
        "Merge complete: {} of {} records to {} ({})",
        records.len(),
        set.len(),
        output.display(),
        to
    );
    finish(report, start, common)
}

fn finish(mut report: ConversionReport, start: Instant, common: &CommonArgs) -> Result<()> {
    report.set_duration(start.elapsed());
    report.finalize();
    report.display();

    if let Some(path) = &common.report {
        report
            .save_to_file(path)
            .with_context(|| format!("Cannot save report to {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }

    if report.files_processed > 0 && report.files_failed == report.files_processed {
        anyhow::bail!("No file could be processed: {}", report.summary());
    }
    Ok(())
}

/// Lit et traite les fichiers en parallèle (pipelines indépendants)
fn load_files(paths: &[PathBuf], config: &Config) -> Vec<LoadedFile> {
    paths
        .par_iter()
        .map(|path| {
            let name = path.display().to_string();
            let outcome = std::fs::read(path)
                .map_err(GeoSurveyError::from)
                .and_then(|bytes| {
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    geosurvey::process(&bytes, &filename, bytes.len() as u64, &config.limits)
                });
            LoadedFile { name, outcome }
        })
        .collect()
}

/// Reporte chaque fichier et garde ceux sous le seuil de rejets
fn accept_files(
    files: Vec<LoadedFile>,
    config: &Config,
    report: &mut ConversionReport,
) -> Vec<(String, SourceFormat, ParseResult)> {
    let mut accepted = Vec::with_capacity(files.len());

    for file in files {
        match file.outcome {
            Ok(processed) => {
                let ratio = processed.result.error_ratio();
                report.record_file(&file.name, processed.format, &processed.result);
                if config.exceeds_error_ratio(ratio) {
                    let message = format!(
                        "record error ratio {:.2} exceeds maximum {:.2}",
                        ratio,
                        config.max_record_error_ratio.unwrap_or_default()
                    );
                    warn!(file = %file.name, %message, "File rejected");
                    report.reject_file(&file.name, &message);
                    continue;
                }
                debug!(file = %file.name, records = processed.result.records.len(), "File accepted");
                accepted.push((file.name, processed.format, processed.result));
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "File failed");
                report.record_error(&file.name, &e);
            }
        }
    }
    accepted
}

/// Écrit un export; un Shapefile est découpé par type de géométrie
fn write_export(
    records: &[&GeometryRecord],
    format: ExportFormat,
    output: &Path,
    stem: &str,
    report: &mut ConversionReport,
) -> Result<()> {
    let groups: Vec<(String, Vec<&GeometryRecord>)> = match format {
        ExportFormat::Shapefile => {
            let by_kind = export::shapefile::split_by_kind(records.iter().copied());
            let single = by_kind.len() == 1;
            by_kind
                .into_iter()
                .map(|(kind, group)| {
                    let name = if single {
                        stem.to_string()
                    } else {
                        format!("{}_{}", stem, kind.as_str().to_lowercase())
                    };
                    (name, group)
                })
                .collect()
        }
        _ => vec![(stem.to_string(), records.to_vec())],
    };

    for (name, group) in groups {
        let bytes = export::export(group.iter().copied(), format, &name)
            .with_context(|| format!("Failed to export {} as {}", name, format))?;
        let path = output.join(format!("{}.{}", name, format.extension()));
        std::fs::write(&path, &bytes).with_context(|| format!("Cannot write {}", path.display()))?;
        info!(path = %path.display(), records = group.len(), "Exported");
        report.record_output(&path, group.len(), &bytes);
    }
    Ok(())
}

/// Nom de base d'un fichier source (sans extension)
fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Collecte récursivement les fichiers de levé reconnus par extension
fn collect_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut inputs = Vec::new();
    let entries = std::fs::read_dir(path).with_context(|| format!("Cannot read {}", path.display()))?;
    for entry in entries {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            inputs.extend(collect_inputs(&entry_path)?);
        } else if entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(detect::detect_by_extension)
            .is_some()
        {
            inputs.push(entry_path);
        }
    }

    inputs.sort();
    if inputs.is_empty() {
        anyhow::bail!("No survey files found in {}", path.display());
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "name,kitta_no,owner,lat,lon\nA,12345,John Doe,27.7172,85.3240\nB,777,Sita,27.70,85.30\n";

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/data/parcels.kml")), "parcels");
        assert_eq!(file_stem(Path::new("bundle.zip")), "bundle");
        assert_eq!(file_stem(Path::new("noextension")), "noextension");
    }

    #[test]
    fn test_filter_args_predicate() {
        assert!(FilterArgs::default().predicate().is_none());

        let args = FilterArgs {
            owner: Some("doe".to_string()),
            min_area: Some(1.0),
            kind: Some(GeometryKind::Polygon),
            ..Default::default()
        };
        assert_eq!(args.predicate().unwrap().clauses.len(), 3);
    }

    #[test]
    fn test_collect_inputs_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), CSV).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.KML"), "<kml/>").unwrap();

        let inputs = collect_inputs(dir.path()).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().all(|p| !p.ends_with("notes.txt")));
    }

    #[test]
    fn test_convert_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.csv");
        std::fs::write(&input, CSV).unwrap();
        let output = dir.path().join("out");
        let report_path = dir.path().join("report.json");

        let common = CommonArgs {
            config: None,
            report: Some(report_path.clone()),
        };
        cmd_convert(&input, ExportFormat::GeoJson, &output, &common).unwrap();
        assert!(output.join("points.geojson").exists());
        assert!(report_path.exists());

        cmd_convert(&input, ExportFormat::Shapefile, &output, &CommonArgs::default()).unwrap();
        assert!(output.join("points.zip").exists());
    }

    #[test]
    fn test_merge_filters_and_writes_table() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, CSV).unwrap();
        std::fs::write(&b, CSV).unwrap();
        let output = dir.path().join("out");

        let filter = FilterArgs {
            owner: Some("doe".to_string()),
            ..Default::default()
        };
        cmd_merge(
            &[a, b],
            ExportFormat::Csv,
            &output,
            "merged",
            &filter,
            false,
            true,
            &CommonArgs::default(),
        )
        .unwrap();

        let merged = std::fs::read_to_string(output.join("merged.csv")).unwrap();
        assert_eq!(merged.lines().count(), 2);
        let table = std::fs::read_to_string(output.join("merged_table.csv")).unwrap();
        assert!(table.starts_with("id,name,kitta_no"));
    }

    #[test]
    fn test_all_files_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.csv");
        std::fs::write(&input, "").unwrap();
        assert!(cmd_inspect(&input, &CommonArgs::default()).is_err());
    }
}
