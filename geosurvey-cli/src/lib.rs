//! # geosurvey-cli
//!
//! Interface en ligne de commande pour la normalisation de levés fonciers.
//!
//! ## Features
//!
//! - Inspection (détection, validation, parsing) avec rapport
//! - Conversion vers KML, CSV, Shapefile zippé ou GeoJSON
//! - Fusion multi-fichiers avec filtres et dédoublonnage
//! - Traitement parallèle des fichiers indépendants
//!
//! ## Usage CLI
//!
//! ```bash
//! geosurvey inspect --path ./uploads/
//! geosurvey convert --path parcels.kml --to geojson --output ./out/
//! geosurvey merge a.kml b.csv c.zip --to shapefile --output ./out/ --owner "doe" --min-area 0.5
//! ```

pub mod cli;
pub mod config;
pub mod report;

pub use config::Config;
pub use report::{ConversionReport, ConversionStatus};
