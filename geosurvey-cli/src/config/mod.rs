//! Configuration de la CLI

use std::path::Path;

use anyhow::{Context, Result};
use geosurvey::SizeLimits;
use serde::{Deserialize, Serialize};

/// Variable d'environnement pointant vers un fichier de configuration
pub const CONFIG_ENV: &str = "GEOSURVEY_CONFIG";

/// Configuration principale
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Taille maximale acceptée par format
    #[serde(default)]
    pub limits: SizeLimits,

    /// Dédoublonner les enregistrements fusionnés
    #[serde(default = "default_true")]
    pub deduplicate: bool,

    /// Part d'enregistrements rejetés au-delà de laquelle un fichier est en échec
    #[serde(default)]
    pub max_record_error_ratio: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: SizeLimits::default(),
            deduplicate: true,
            max_record_error_ratio: None,
        }
    }
}

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "default" => Self::load_embedded(include_str!("presets/default.json")),
            "strict" => Self::load_embedded(include_str!("presets/strict.json")),
            _ => anyhow::bail!("Unknown preset: {}. Use: default, strict", preset),
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded config")
    }

    /// Résout `--config`: nom de preset, chemin de fichier, puis `GEOSURVEY_CONFIG`
    pub fn resolve(choice: Option<&str>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok();
        match choice.or(from_env.as_deref()) {
            None => Self::from_preset("default"),
            Some(name @ ("default" | "strict")) => Self::from_preset(name),
            Some(path) => Self::load(Path::new(path)),
        }
    }

    /// Un fichier dont la part de rejets dépasse le seuil est en échec
    pub fn exceeds_error_ratio(&self, ratio: f64) -> bool {
        self.max_record_error_ratio
            .map_or(false, |max| ratio > max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_load() {
        let default = Config::from_preset("default").unwrap();
        assert_eq!(default, Config::default());

        let strict = Config::from_preset("strict").unwrap();
        assert!(strict.limits.kml < default.limits.kml);
        assert!(strict.exceeds_error_ratio(0.01));
        assert!(!default.exceeds_error_ratio(0.99));
    }

    #[test]
    fn test_unknown_preset() {
        assert!(Config::from_preset("lenient").is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_record_error_ratio": 0.25}"#).unwrap();
        assert!(config.deduplicate);
        assert_eq!(config.limits, SizeLimits::default());
        assert!(config.exceeds_error_ratio(0.5));
        assert!(!config.exceeds_error_ratio(0.25));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"deduplicate": false, "limits": {"csv": 1024}}"#).unwrap();

        let config = Config::resolve(Some(path.to_str().unwrap())).unwrap();
        assert!(!config.deduplicate);
        assert_eq!(config.limits.csv, 1024);
        assert_eq!(config.limits.kml, SizeLimits::default().kml);
    }
}
