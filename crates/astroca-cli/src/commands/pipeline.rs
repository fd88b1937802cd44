//! In-memory pipeline command implementation

use super::registry_helper::build_registry;
use anyhow::{Context as _, Result};
use astroca_core::exporter::DEFAULT_EXTENSION;
use astroca_core::{
    BoundaryPaths, FrameExporter, FrameNaming, InputRole, Pipeline, PipelineOutcome, Product,
    StageKind, TiffVolumeIo, VolumeAssembler,
};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args)]
pub struct PipelineCommand {
    /// YAML pipeline manifest
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,

    /// Raw per-timepoint volumes, in time order
    #[arg(short, long, value_name = "FILE", num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    /// Directory receiving every product, the boundary index and the feature table
    #[arg(long, value_name = "DIR")]
    output_dir: PathBuf,

    /// Boundary index of the raw frames, when the manifest has no boundary step
    #[arg(long, value_name = "FILE", requires = "index_xmax")]
    index_xmin: Option<PathBuf>,

    #[arg(long, value_name = "FILE", requires = "index_xmin")]
    index_xmax: Option<PathBuf>,

    /// Use passthrough kernels for stages without a built-in kernel
    #[arg(long)]
    dry_run: bool,
}

impl PipelineCommand {
    pub fn execute(self) -> Result<()> {
        info!("=== Astroca Pipeline ===");
        info!("Manifest: {}", self.manifest.display());
        info!("Output directory: {}", self.output_dir.display());

        let pipeline = Pipeline::load(&self.manifest)
            .with_context(|| format!("Failed to load manifest {}", self.manifest.display()))?;
        let boundaries = match (&self.index_xmin, &self.index_xmax) {
            (Some(xmin), Some(xmax)) => Some(
                BoundaryPaths::explicit(xmin, xmax)
                    .load()
                    .context("Failed to load boundary index")?,
            ),
            _ => None,
        };
        pipeline
            .validate(boundaries.is_some())
            .context("Invalid pipeline manifest")?;

        let raw = VolumeAssembler::new(&TiffVolumeIo)
            .assemble(InputRole::Primary, &self.input)
            .context("Failed to assemble input volumes")?;

        let registry = build_registry(self.dry_run);
        let outcome = pipeline
            .run(&registry, raw, boundaries)
            .context("Pipeline failed")?;

        let extension = self
            .input
            .first()
            .and_then(|p| p.extension())
            .map_or_else(
                || DEFAULT_EXTENSION.to_string(),
                |e| e.to_string_lossy().into_owned(),
            );
        write_outcome(&outcome, &self.output_dir, &extension)?;
        Ok(())
    }
}

/// Persist every product except the raw input
fn write_outcome(outcome: &PipelineOutcome, dir: &Path, extension: &str) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let exporter = FrameExporter::new(&TiffVolumeIo);

    for (product, volume) in &outcome.products {
        if *product == Product::Raw {
            continue;
        }
        let naming = FrameNaming::new(&dir.join(product.as_str()), extension);
        let written = exporter
            .export(volume, &naming)
            .with_context(|| format!("Failed to export {product}"))?;
        println!("{product}: {} frames", written.len());
    }

    if let Some(index) = &outcome.boundaries {
        let paths = index.save(dir).context("Failed to save boundary index")?;
        println!("boundaries: {}", paths.xmin.display());
    }
    if let Some(features) = &outcome.features {
        let path = dir.join(StageKind::FeatureExtraction.descriptor().default_output);
        features.write_csv(&path)?;
        println!("features: {} rows in {}", features.len(), path.display());
    }
    if let Some(count) = outcome.event_count {
        println!("events: {count}");
    }
    if let Some(noise) = outcome.mean_noise {
        println!("mean noise: {noise:.4}");
    }
    for (stage, duration) in &outcome.durations {
        info!("  {}: {:.2}s", stage, duration.as_secs_f64());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use astroca_core::{ElementType, Volume4D, VolumeShape};
    use tempfile::TempDir;

    #[test]
    fn test_write_outcome_layout() {
        let dir = TempDir::new().unwrap();
        let mut outcome = PipelineOutcome::default();
        let frames = Volume4D::zeros(ElementType::U8, 2, VolumeShape::new(1, 2, 2));
        outcome.products.insert(Product::Raw, frames.clone());
        outcome.products.insert(Product::Closed, frames);
        outcome.boundaries = Some(astroca_core::BoundaryIndex::full(1, 2));

        write_outcome(&outcome, dir.path(), "tiff").unwrap();

        assert!(dir.path().join("closed0.tiff").is_file());
        assert!(dir.path().join("closed1.tiff").is_file());
        assert!(!dir.path().join("raw0.tiff").exists());
        assert!(dir.path().join("index_xmin.npy").is_file());
        assert!(!dir.path().join("features_extracted.csv").exists());
    }
}
