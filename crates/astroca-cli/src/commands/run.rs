//! Single stage command implementation

use super::registry_helper::build_registry;
use crate::parser::{load_params_file, merge_params, parse_params};
use anyhow::{Context as _, Result};
use astroca_core::{
    BoundaryPaths, FrameworkOptions, InputRole, StageKind, StageReport, StageRequest, StageRunner,
};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct RunCommand {
    /// Stage to run (see `astroca stages`)
    #[arg(value_name = "STAGE")]
    stage: StageKind,

    /// Per-timepoint input volumes, in time order
    #[arg(short, long, value_name = "FILE", num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    /// Background volumes (dynamic image, image amplitude)
    #[arg(long, value_name = "FILE", num_args = 1..)]
    background: Vec<PathBuf>,

    /// Dynamic image volumes (active voxels)
    #[arg(long, value_name = "FILE", num_args = 1..)]
    dynamic_image: Vec<PathBuf>,

    /// Amplitude volumes (feature extraction)
    #[arg(long, value_name = "FILE", num_args = 1..)]
    amplitude: Vec<PathBuf>,

    /// Canonical xmin index file
    #[arg(long, value_name = "FILE", requires = "index_xmax")]
    index_xmin: Option<PathBuf>,

    /// Canonical xmax index file
    #[arg(long, value_name = "FILE", requires = "index_xmin")]
    index_xmax: Option<PathBuf>,

    /// Output base name, or the CSV path for feature extraction
    /// [default: the stage's default output in the current directory]
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Stage parameter as key=value (repeatable)
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// YAML file of stage parameters; --param entries take precedence
    #[arg(long = "params", value_name = "FILE")]
    params_file: Option<PathBuf>,

    /// Ask the kernel to save its intermediate results
    #[arg(long)]
    save_results: bool,

    /// Directory for the kernel's intermediate results
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Use passthrough kernels for stages without a built-in kernel
    #[arg(long)]
    dry_run: bool,
}

impl RunCommand {
    pub fn execute(self) -> Result<()> {
        let request = self.request()?;
        info!("Input frames: {}", request.inputs[&InputRole::Primary].len());
        info!("Output: {}", request.output.display());

        let runner = StageRunner::new(build_registry(self.dry_run));
        let report = runner
            .run(&request)
            .with_context(|| format!("Stage {} failed", self.stage))?;
        print_report(&report);
        Ok(())
    }

    fn request(&self) -> Result<StageRequest> {
        let cli_params = parse_params(&self.params).context("Invalid --param")?;
        let params = match &self.params_file {
            Some(path) => merge_params(load_params_file(path)?, cli_params),
            None => cli_params,
        };

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.stage.descriptor().default_output));
        let mut request = StageRequest::new(self.stage, self.input.clone(), output)
            .with_params(params)
            .with_options(FrameworkOptions {
                save_results: self.save_results,
                output_dir: self.output_dir.clone(),
            });

        for (role, paths) in [
            (InputRole::Background, &self.background),
            (InputRole::DynamicImage, &self.dynamic_image),
            (InputRole::Amplitude, &self.amplitude),
        ] {
            if !paths.is_empty() {
                request = request.with_auxiliary(role, paths.clone());
            }
        }
        if let (Some(xmin), Some(xmax)) = (&self.index_xmin, &self.index_xmax) {
            request = request.with_boundaries(BoundaryPaths::explicit(xmin, xmax));
        }
        Ok(request)
    }
}

pub(crate) fn print_report(report: &StageReport) {
    println!(
        "{}: {} timepoints of {}",
        report.stage, report.input_timepoints, report.input_frame
    );
    for path in &report.frames {
        println!("  wrote {}", path.display());
    }
    if let Some(paths) = &report.boundary_files {
        println!("  wrote {}", paths.xmin.display());
        println!("  wrote {}", paths.xmax.display());
    }
    if let Some(table) = &report.table {
        println!("  wrote {}", table.display());
    }
    if let Some(count) = report.event_count {
        println!("  events: {count}");
    }
    if let Some(noise) = report.mean_noise {
        println!("  mean noise: {noise:.4}");
    }
    println!("  completed in {:.2}s", report.duration.as_secs_f64());
}
