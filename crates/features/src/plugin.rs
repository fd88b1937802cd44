//! Kernel wrapper for feature extraction

use crate::extract_features;
use astroca_core::config::StageParams;
use astroca_core::{InputRole, Kernel, KernelInput, KernelOutput, StageKind};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractionKernel;

impl FeatureExtractionKernel {
    pub fn new() -> Self {
        Self
    }
}

impl Kernel for FeatureExtractionKernel {
    fn name(&self) -> &str {
        "feature_extraction"
    }

    fn stage(&self) -> StageKind {
        StageKind::FeatureExtraction
    }

    fn invoke(&self, input: &KernelInput<'_>) -> anyhow::Result<KernelOutput> {
        let StageParams::FeatureExtraction(params) = input.config.params() else {
            anyhow::bail!("Expected feature extraction parameters");
        };

        let labels = input.primary.to_labels()?;
        let amplitude = input.auxiliary.require(InputRole::Amplitude)?.to_f64();
        debug!(
            "Extracting {} events from {} timepoints",
            params.ids_events,
            input.primary.timepoints()
        );

        let table = extract_features(labels.view(), amplitude.view(), params)?;
        Ok(KernelOutput::table(table))
    }
}
