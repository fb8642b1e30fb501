//! Point d'entrée CLI pour geosurvey

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use geosurvey_cli::cli::{self, Commands};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Convertir, inspecter et fusionner des fichiers de levés fonciers
#[derive(Parser)]
#[command(name = "geosurvey")]
#[command(author, version)]
#[command(about = "Inspect, convert and merge land survey files (KML, CSV, zipped Shapefile)")]
#[command(long_about = "Normalises KML, CSV and zipped Shapefile survey files into one geometry model and exports them as KML, CSV, Shapefile or GeoJSON.\n\nThe GEOSURVEY_CONFIG environment variable (or --config) selects a preset or a JSON config file.")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Inspect { path, common } => {
            info!(path = %path.display(), "Inspect");
            cli::cmd_inspect(&path, &common)?;
        }
        Commands::Convert {
            path,
            to,
            output,
            common,
        } => {
            info!(path = %path.display(), output = %output.display(), %to, "Convert");
            cli::cmd_convert(&path, to, &output, &common)?;
        }
        Commands::Merge {
            paths,
            to,
            output,
            output_name,
            filter,
            no_dedup,
            table,
            common,
        } => {
            info!(files = paths.len(), output = %output.display(), %to, "Merge");
            cli::cmd_merge(
                &paths,
                to,
                &output,
                &output_name,
                &filter,
                no_dedup,
                table,
                &common,
            )?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
