//! In-memory multi-stage runs
//!
//! A [`Pipeline`] is an ordered list of steps. Each step reads named products
//! produced by earlier steps (or the raw input) and stores its volume under a
//! product name of its own. Frames and the boundary index stay fixed from the
//! boundary step onwards; the invoker enforces that at every step.

use crate::boundary::BoundaryIndex;
use crate::config::{FrameworkOptions, ParamValue, Params, StageConfig};
use crate::error::StageError;
use crate::invoker::KernelInvoker;
use crate::kernel::AuxiliaryVolumes;
use crate::registry::KernelRegistry;
use crate::stage::{InputRole, StageKind};
use crate::table::FeatureTable;
use astroca_common::Volume4D;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Named volume slot of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    Raw,
    Cropped,
    Background,
    Dynamic,
    Stabilized,
    Amplitude,
    Active,
    Closed,
    Filtered,
    Events,
}

impl Product {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Product::Raw => "raw",
            Product::Cropped => "cropped",
            Product::Background => "background",
            Product::Dynamic => "dynamic",
            Product::Stabilized => "stabilized",
            Product::Amplitude => "amplitude",
            Product::Active => "active",
            Product::Closed => "closed",
            Product::Filtered => "filtered",
            Product::Events => "events",
        }
    }

    /// Slot a stage writes when the step names none
    #[must_use]
    pub const fn default_for(stage: StageKind) -> Option<Product> {
        match stage {
            StageKind::BoundaryComputation => Some(Product::Cropped),
            StageKind::BackgroundEstimation => Some(Product::Background),
            StageKind::DynamicImage => Some(Product::Dynamic),
            StageKind::VarianceStabilization => Some(Product::Stabilized),
            StageKind::ImageAmplitude => Some(Product::Amplitude),
            StageKind::ActiveVoxels => Some(Product::Active),
            StageKind::Closing => Some(Product::Closed),
            StageKind::MedianFilter => Some(Product::Filtered),
            StageKind::EventDetection => Some(Product::Events),
            StageKind::FeatureExtraction => None,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub stage: StageKind,
    #[serde(default)]
    pub params: Params,
    pub input: Product,
    #[serde(default)]
    pub auxiliary: BTreeMap<InputRole, Product>,
    /// Defaults to [`Product::default_for`] the stage
    #[serde(default)]
    pub output: Option<Product>,
}

impl PipelineStep {
    pub fn new(stage: StageKind, input: Product) -> Self {
        Self {
            stage,
            params: Params::new(),
            input,
            auxiliary: BTreeMap::new(),
            output: None,
        }
    }

    #[must_use]
    pub fn with_auxiliary(mut self, role: InputRole, product: Product) -> Self {
        self.auxiliary.insert(role, product);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn output_product(&self) -> Option<Product> {
        self.output.or_else(|| Product::default_for(self.stage))
    }
}

/// Ordered stages of one run, loadable from a YAML manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub save_results: bool,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// Everything a pipeline run produced
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub products: BTreeMap<Product, Volume4D>,
    pub boundaries: Option<BoundaryIndex>,
    pub event_count: Option<usize>,
    pub mean_noise: Option<f64>,
    pub features: Option<FeatureTable>,
    pub durations: Vec<(StageKind, Duration)>,
}

impl Pipeline {
    /// The canonical analysis order
    ///
    /// `boundary` carries `x_min`, `x_max` and `pixel_cropped`; `features`
    /// may omit `ids_events`, which then comes from the event count.
    pub fn standard(boundary: Params, features: Params) -> Self {
        use InputRole as R;
        use Product as P;
        Self {
            steps: vec![
                PipelineStep::new(StageKind::BoundaryComputation, P::Raw).with_params(boundary),
                PipelineStep::new(StageKind::BackgroundEstimation, P::Cropped),
                PipelineStep::new(StageKind::DynamicImage, P::Cropped)
                    .with_auxiliary(R::Background, P::Background),
                PipelineStep::new(StageKind::VarianceStabilization, P::Cropped),
                PipelineStep::new(StageKind::ActiveVoxels, P::Stabilized)
                    .with_auxiliary(R::DynamicImage, P::Dynamic),
                PipelineStep::new(StageKind::Closing, P::Active),
                PipelineStep::new(StageKind::MedianFilter, P::Closed),
                PipelineStep::new(StageKind::EventDetection, P::Filtered),
                PipelineStep::new(StageKind::ImageAmplitude, P::Stabilized)
                    .with_auxiliary(R::Background, P::Background),
                PipelineStep::new(StageKind::FeatureExtraction, P::Events)
                    .with_auxiliary(R::Amplitude, P::Amplitude)
                    .with_params(features),
            ],
            save_results: false,
            output_dir: None,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, StageError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, StageError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml(&self) -> Result<String, StageError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check that every product is produced before it is read
    pub fn validate(&self, boundaries_supplied: bool) -> Result<(), StageError> {
        let mut available = vec![Product::Raw];
        let mut has_boundaries = boundaries_supplied;
        for (index, step) in self.steps.iter().enumerate() {
            let descriptor = step.stage.descriptor();
            let reads = std::iter::once(step.input).chain(step.auxiliary.values().copied());
            for product in reads {
                if !available.contains(&product) {
                    return Err(StageError::MissingProduct {
                        step: index + 1,
                        stage: step.stage,
                        product,
                    });
                }
            }
            for &role in descriptor.auxiliary {
                if !step.auxiliary.contains_key(&role) {
                    return Err(StageError::MissingAuxiliary {
                        stage: step.stage,
                        role,
                    });
                }
            }
            if descriptor.needs_boundaries && !has_boundaries {
                return Err(StageError::MissingBoundaries { stage: step.stage });
            }
            if step.stage == StageKind::BoundaryComputation {
                has_boundaries = true;
            }
            if let Some(product) = step.output_product() {
                available.push(product);
            }
        }
        Ok(())
    }

    /// Run every step in order against `registry`
    pub fn run(
        &self,
        registry: &KernelRegistry,
        raw: Volume4D,
        boundaries: Option<BoundaryIndex>,
    ) -> Result<PipelineOutcome, StageError> {
        self.validate(boundaries.is_some())?;
        info!("=== Pipeline: {} stages ===", self.steps.len());
        let start = Instant::now();
        let options = FrameworkOptions {
            save_results: self.save_results,
            output_dir: self.output_dir.clone(),
        };
        let invoker = KernelInvoker::new(registry);

        let mut outcome = PipelineOutcome {
            boundaries,
            ..PipelineOutcome::default()
        };
        outcome.products.insert(Product::Raw, raw);

        for (index, step) in self.steps.iter().enumerate() {
            info!(
                "--- Stage {}/{}: {} ---",
                index + 1,
                self.steps.len(),
                step.stage.descriptor().name
            );
            let stage_start = Instant::now();

            let mut params = step.params.clone();
            if step.stage == StageKind::FeatureExtraction && !params.contains_key("ids_events") {
                if let Some(count) = outcome.event_count {
                    debug!("Using event count {} as ids_events", count);
                    params.insert("ids_events".to_string(), ParamValue::Int(count as i64));
                }
            }

            let output = {
                let primary = lookup(&outcome.products, index, step, step.input)?;
                let auxiliary = step
                    .auxiliary
                    .iter()
                    .map(|(role, p)| Ok((*role, lookup(&outcome.products, index, step, *p)?)))
                    .collect::<Result<AuxiliaryVolumes<'_>, StageError>>()?;
                let config = StageConfig::build(step.stage, &params, options.clone())?
                    .resolve(primary.timepoints(), primary.frame_shape())?;
                invoker.invoke(&config, primary, &auxiliary, outcome.boundaries.as_ref())?
            };

            if let Some(volume) = output.volume {
                if let Some(slot) = step.output_product() {
                    outcome.products.insert(slot, volume);
                }
            }
            if output.side.boundaries.is_some() {
                outcome.boundaries = output.side.boundaries;
            }
            outcome.event_count = output.side.event_count.or(outcome.event_count);
            outcome.mean_noise = output.side.mean_noise.or(outcome.mean_noise);
            if output.side.features.is_some() {
                outcome.features = output.side.features;
            }

            let elapsed = stage_start.elapsed();
            info!("  ✓ Completed in {:.2}s", elapsed.as_secs_f64());
            outcome.durations.push((step.stage, elapsed));
        }

        info!("=== Pipeline Completed ===");
        info!("Total time: {:.2}s", start.elapsed().as_secs_f64());
        Ok(outcome)
    }
}

fn lookup<'a>(
    products: &'a BTreeMap<Product, Volume4D>,
    index: usize,
    step: &PipelineStep,
    product: Product,
) -> Result<&'a Volume4D, StageError> {
    products.get(&product).ok_or(StageError::MissingProduct {
        step: index + 1,
        stage: step.stage,
        product,
    })
}
