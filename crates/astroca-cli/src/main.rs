//! Astroca CLI - calcium-imaging stage runner
//!
//! Command-line interface for running analysis stages on per-timepoint
//! volume files.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod parser;

use commands::check_boundaries::CheckBoundariesCommand;
use commands::pipeline::PipelineCommand;
use commands::run::RunCommand;
use commands::stages::StagesCommand;

#[derive(Parser)]
#[command(
    name = "astroca",
    version,
    about = "Stage runner for 4D calcium-imaging analysis",
    long_about = "Run calcium-imaging analysis stages on sequences stored as one 3D volume per timepoint.\n\
                  Each stage stacks its inputs into a (T, Z, Y, X) volume, applies its kernel and\n\
                  writes one output file per timepoint.",
    after_help = "EXAMPLES:\n  \
                  # List all stages with their parameters\n  \
                  astroca stages\n\n  \
                  # Crop and compute the per-slice boundary index\n  \
                  astroca run boundary-computation -i raw0.tif raw1.tif -o out/cropped.tif \\\n      \
                  -p x_min=0 -p x_max=319 -p pixel_cropped=2\n\n  \
                  # Extract features from detected events\n  \
                  astroca run feature-extraction -i out/events0.tif out/events1.tif \\\n      \
                  --amplitude out/amplitude0.tif out/amplitude1.tif \\\n      \
                  --index-xmin out/index_xmin.npy --index-xmax out/index_xmax.npy \\\n      \
                  -p ids_events=12 -o out/features.csv\n\n  \
                  # Check a boundary index against a volume\n  \
                  astroca check-boundaries --index-xmin out/index_xmin.npy \\\n      \
                  --index-xmax out/index_xmax.npy -i out/cropped0.tif\n\n  \
                  # Run a whole manifest in memory\n  \
                  astroca pipeline -m pipeline.yaml -i raw*.tif --output-dir results\n\n\
                  For more details on a specific command:\n  \
                  astroca <COMMAND> --help"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one stage on per-timepoint files
    Run(RunCommand),

    /// Run a YAML pipeline manifest in memory
    Pipeline(PipelineCommand),

    /// Validate a boundary index against a volume
    CheckBoundaries(CheckBoundariesCommand),

    /// List available stages
    Stages(StagesCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the stage listing free of registration noise
    let log_level = match &cli.command {
        Commands::Stages(_) => Level::WARN,
        _ => {
            if cli.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            }
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Pipeline(cmd) => cmd.execute(),
        Commands::CheckBoundaries(cmd) => cmd.execute(),
        Commands::Stages(cmd) => cmd.execute(),
    }
}
