//! Recompose CLI: probe sources, resolve composition plans, and run
//! compositions against the synthetic backend.
//!
//! Usage:
//!   recompose probe <SOURCE>       Show source metadata
//!   recompose plan <SOURCE>        Resolve a configuration against a source
//!   recompose simulate [OPTIONS]   Run a full composition on synthetic media
//!   recompose check                Check external tool availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod options;

use options::{CompositionArgs, SyntheticArgs};

#[derive(Parser)]
#[command(
    name = "recompose",
    about = "Re-encode, resize, rotate and retime video clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata of a video source (requires ffprobe)
    Probe {
        /// Path to the source video
        source: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Resolve a configuration against a source and print the plan
    Plan {
        /// Path to the source video or still image
        source: PathBuf,

        #[command(flatten)]
        composition: CompositionArgs,
    },

    /// Run a complete composition on the synthetic backend
    Simulate {
        /// Output path; a JSON-lines sample journal is written here
        #[arg(short, long, default_value = "simulated.jsonl")]
        output: PathBuf,

        /// JSON file with faults to inject
        #[arg(long)]
        faults: Option<PathBuf>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        synthetic: SyntheticArgs,

        #[command(flatten)]
        composition: CompositionArgs,
    },

    /// Check external tool availability
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app_config = match &cli.config {
        Some(path) => recompose_common::AppConfig::load_from(path),
        None => recompose_common::AppConfig::load(),
    };
    if cli.verbose {
        app_config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        app_config.logging.json = true;
    }
    recompose_common::logging::init_logging(&app_config.logging);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(recompose_common::config_file_path);
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Probe { source, json } => commands::probe::run(source, json),
        Commands::Plan {
            source,
            composition,
        } => commands::plan::run(source, &composition, &app_config),
        Commands::Simulate {
            output,
            faults,
            json,
            synthetic,
            composition,
        } => commands::simulate::run(output, faults, json, &synthetic, &composition, &app_config),
        Commands::Check => commands::check::run(),
    }
}
