//! Archives ZIP de Shapefile
//!
//! Lecture de la liste des entrées, extraction dans un répertoire temporaire
//! possédé par l'appelant, et empaquetage des fichiers compagnons à l'export.

use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::GeoSurveyError;

/// Signature d'un en-tête local ZIP
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Extensions des fichiers compagnons d'un Shapefile
pub const SHAPEFILE_COMPONENTS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

/// Noms des entrées (fichiers uniquement)
pub fn list_entries(bytes: &[u8]) -> Result<Vec<String>, GeoSurveyError> {
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    Ok(archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect())
}

/// Première entrée `.shp` (insensible à la casse), par ordre alphabétique
pub fn find_shape_entry(names: &[String]) -> Option<&str> {
    names
        .iter()
        .filter(|n| has_extension(n, "shp"))
        .min()
        .map(String::as_str)
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Bundle Shapefile extrait dans un répertoire temporaire
///
/// Le répertoire est supprimé au drop, y compris sur un chemin d'erreur.
#[derive(Debug)]
pub struct ExtractedBundle {
    scratch: TempDir,
    pub shp_path: PathBuf,
    /// Nombre de fichiers .shp dans l'archive (seul le premier est lu)
    pub layer_count: usize,
}

impl ExtractedBundle {
    pub fn dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Fichier compagnon du .shp (même nom, autre extension), s'il existe
    pub fn companion(&self, extension: &str) -> Option<PathBuf> {
        let stem = self.shp_path.file_stem()?.to_str()?;
        let parent = self.shp_path.parent()?;
        fs::read_dir(parent)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
            })
    }
}

/// Extrait les fichiers compagnons d'une archive dans `scratch`
///
/// Les entrées dont le chemin sort du répertoire sont ignorées.
pub fn extract_shapefile_bundle(
    bytes: &[u8],
    scratch: TempDir,
) -> Result<ExtractedBundle, GeoSurveyError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut shp_paths = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping zip entry with unsafe path");
            continue;
        };

        let name = relative.to_string_lossy().to_string();
        if !SHAPEFILE_COMPONENTS.iter().any(|ext| has_extension(&name, ext)) {
            continue;
        }

        // Extension en minuscules: le lecteur cherche `<nom>.dbf`, `<nom>.shx`
        let extension = relative
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let out_path = scratch.path().join(&relative).with_extension(extension);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        if has_extension(&name, "shp") {
            shp_paths.push(out_path);
        }
    }

    shp_paths.sort();
    let layer_count = shp_paths.len();
    let shp_path = shp_paths
        .into_iter()
        .next()
        .ok_or_else(|| GeoSurveyError::validation("ZIP file does not contain .shp file"))?;

    if layer_count > 1 {
        warn!(layers = layer_count, "Archive holds several layers, reading the first");
    }
    debug!(path = %shp_path.display(), "Shapefile bundle extracted");

    Ok(ExtractedBundle {
        scratch,
        shp_path,
        layer_count,
    })
}

/// Place un `.shp` seul (hors archive) dans `scratch`
pub fn stage_bare_shape(bytes: &[u8], scratch: TempDir) -> Result<ExtractedBundle, GeoSurveyError> {
    let shp_path = scratch.path().join("layer.shp");
    fs::write(&shp_path, bytes)?;
    Ok(ExtractedBundle {
        scratch,
        shp_path,
        layer_count: 1,
    })
}

/// Empaquette des fichiers `(nom, contenu)` dans une archive ZIP en mémoire
pub fn pack(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>, GeoSurveyError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(content)?;
    }

    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_list() {
        let zip = pack(&[
            ("parcels.shp".to_string(), vec![1, 2, 3]),
            ("parcels.dbf".to_string(), vec![4]),
        ])
        .unwrap();
        assert!(is_zip(&zip));

        let names = list_entries(&zip).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(find_shape_entry(&names), Some("parcels.shp"));
    }

    #[test]
    fn test_find_shape_entry_case_insensitive() {
        let names = vec!["data/ROADS.SHP".to_string(), "data/roads.dbf".to_string()];
        assert_eq!(find_shape_entry(&names), Some("data/ROADS.SHP"));
        assert_eq!(find_shape_entry(&["a.txt".to_string()]), None);
    }

    #[test]
    fn test_extract_bundle_and_cleanup() {
        let zip = pack(&[
            ("layer/parcels.shp".to_string(), vec![0; 10]),
            ("layer/parcels.prj".to_string(), b"GEOGCS[\"WGS 84\"]".to_vec()),
            ("notes.txt".to_string(), b"ignored".to_vec()),
        ])
        .unwrap();

        let scratch = TempDir::new().unwrap();
        let bundle = extract_shapefile_bundle(&zip, scratch).unwrap();
        let dir = bundle.dir().to_path_buf();
        assert!(bundle.shp_path.exists());
        assert!(bundle.companion("prj").is_some());
        assert!(bundle.companion("dbf").is_none());
        assert!(!dir.join("notes.txt").exists());

        drop(bundle);
        assert!(!dir.exists());
    }

    #[test]
    fn test_extension_lowercased() {
        let zip = pack(&[
            ("ROADS.SHP".to_string(), vec![0; 4]),
            ("ROADS.DBF".to_string(), vec![0; 4]),
        ])
        .unwrap();
        let bundle = extract_shapefile_bundle(&zip, TempDir::new().unwrap()).unwrap();
        assert!(bundle.shp_path.ends_with("ROADS.shp"));
        assert!(bundle.companion("dbf").is_some());
    }

    #[test]
    fn test_extract_without_shp() {
        let zip = pack(&[("a.dbf".to_string(), vec![1])]).unwrap();
        let scratch = TempDir::new().unwrap();
        let dir = scratch.path().to_path_buf();
        let err = extract_shapefile_bundle(&zip, scratch).unwrap_err();
        assert!(err.to_string().contains(".shp"));
        // Le répertoire est supprimé même en cas d'erreur
        assert!(!dir.exists());
    }
}
