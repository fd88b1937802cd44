//! Boundary index validation command

use anyhow::{Context as _, Result};
use astroca_core::{BoundaryIndex, BoundaryPaths, TiffVolumeIo, VolumeReader, VolumeShape};
use clap::Args;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args)]
pub struct CheckBoundariesCommand {
    /// xmin index file
    #[arg(long, value_name = "FILE")]
    index_xmin: PathBuf,

    /// xmax index file
    #[arg(long, value_name = "FILE")]
    index_xmax: PathBuf,

    /// One volume of the run whose frame the index must describe
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,
}

impl CheckBoundariesCommand {
    pub fn execute(self) -> Result<()> {
        let index = BoundaryPaths::explicit(&self.index_xmin, &self.index_xmax)
            .load()
            .context("Failed to load boundary index")?;
        let shape = TiffVolumeIo
            .read_volume(&self.input)
            .with_context(|| format!("Failed to read {}", self.input.display()))?
            .shape();

        check(&index, shape)?;
        println!(
            "Boundary index OK: {} slices, frame {}",
            index.depth(),
            shape
        );
        Ok(())
    }
}

fn check(index: &BoundaryIndex, shape: VolumeShape) -> Result<()> {
    for z in 0..index.depth() {
        if let Some(columns) = index.columns(z) {
            debug!("z={}: columns {}..={}", z, columns.start(), columns.end());
        }
    }
    index
        .validate(shape)
        .with_context(|| format!("Boundary index does not match frame {shape}"))
}
