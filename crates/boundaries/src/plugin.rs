//! Kernel wrapper for boundary computation

use crate::compute_boundaries;
use astroca_core::config::StageParams;
use astroca_core::{Kernel, KernelInput, KernelOutput, StageKind};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct BoundaryComputationKernel;

impl BoundaryComputationKernel {
    pub fn new() -> Self {
        Self
    }
}

impl Kernel for BoundaryComputationKernel {
    fn name(&self) -> &str {
        "boundary_computation"
    }

    fn stage(&self) -> StageKind {
        StageKind::BoundaryComputation
    }

    fn invoke(&self, input: &KernelInput<'_>) -> anyhow::Result<KernelOutput> {
        let start = Instant::now();
        let StageParams::BoundaryComputation(params) = input.config.params() else {
            anyhow::bail!("Expected boundary computation parameters");
        };

        let result = compute_boundaries(input.primary, params)?;
        debug!(
            "Boundary computation took {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(KernelOutput::volume(result.volume).with_boundaries(result.index))
    }
}
