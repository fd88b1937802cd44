//! Kernel trait and related types

use crate::boundary::BoundaryIndex;
use crate::config::StageConfig;
use crate::stage::{InputRole, OutputKind, StageKind};
use crate::table::FeatureTable;
use astroca_common::Volume4D;
use std::collections::BTreeMap;

/// The numeric core of one stage
///
/// A kernel receives the assembled inputs and its typed configuration and
/// returns a transformed volume plus side outputs. It must not retain the
/// inputs, and any error it returns reaches the caller unchanged.
pub trait Kernel: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &str;

    /// Stage this kernel implements
    fn stage(&self) -> StageKind;

    fn invoke(&self, input: &KernelInput<'_>) -> anyhow::Result<KernelOutput>;
}

/// Auxiliary 4D inputs keyed by role, borrowed for one invocation
#[derive(Debug, Default)]
pub struct AuxiliaryVolumes<'a> {
    volumes: BTreeMap<InputRole, &'a Volume4D>,
}

impl<'a> AuxiliaryVolumes<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: InputRole, volume: &'a Volume4D) {
        self.volumes.insert(role, volume);
    }

    #[must_use]
    pub fn get(&self, role: InputRole) -> Option<&'a Volume4D> {
        self.volumes.get(&role).copied()
    }

    /// Like [`get`](Self::get), as an error kernels can return directly
    pub fn require(&self, role: InputRole) -> anyhow::Result<&'a Volume4D> {
        self.get(role)
            .ok_or_else(|| anyhow::anyhow!("missing {role} input"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputRole, &'a Volume4D)> + '_ {
        self.volumes.iter().map(|(role, volume)| (*role, *volume))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

impl<'a> FromIterator<(InputRole, &'a Volume4D)> for AuxiliaryVolumes<'a> {
    fn from_iter<I: IntoIterator<Item = (InputRole, &'a Volume4D)>>(iter: I) -> Self {
        Self {
            volumes: iter.into_iter().collect(),
        }
    }
}

/// Everything a kernel may read
pub struct KernelInput<'a> {
    pub primary: &'a Volume4D,
    pub auxiliary: &'a AuxiliaryVolumes<'a>,
    pub boundaries: Option<&'a BoundaryIndex>,
    pub config: &'a StageConfig,
}

/// Values a stage reports besides its volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideOutputs {
    /// Number of labelled events (event detection)
    pub event_count: Option<usize>,
    /// Mean noise estimate (dynamic image)
    pub mean_noise: Option<f64>,
    /// Index defining the run's frame (boundary computation)
    pub boundaries: Option<BoundaryIndex>,
    pub features: Option<FeatureTable>,
}

#[derive(Debug, Default)]
pub struct KernelOutput {
    pub volume: Option<Volume4D>,
    pub side: SideOutputs,
}

impl KernelOutput {
    #[must_use]
    pub fn volume(volume: Volume4D) -> Self {
        Self {
            volume: Some(volume),
            side: SideOutputs::default(),
        }
    }

    #[must_use]
    pub fn table(table: FeatureTable) -> Self {
        Self {
            volume: None,
            side: SideOutputs {
                features: Some(table),
                ..SideOutputs::default()
            },
        }
    }

    #[must_use]
    pub fn with_event_count(mut self, count: usize) -> Self {
        self.side.event_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_mean_noise(mut self, noise: f64) -> Self {
        self.side.mean_noise = Some(noise);
        self
    }

    #[must_use]
    pub fn with_boundaries(mut self, boundaries: BoundaryIndex) -> Self {
        self.side.boundaries = Some(boundaries);
        self
    }
}

/// Returns its primary input unchanged
///
/// Used to exercise the surrounding plumbing without the numeric kernels.
/// For boundary computation it reports a full-width index for the input
/// frame. It cannot stand in for stages that produce a table.
pub struct PassthroughKernel {
    stage: StageKind,
    name: String,
}

impl PassthroughKernel {
    #[must_use]
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            name: format!("passthrough_{stage}"),
        }
    }
}

impl Kernel for PassthroughKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> StageKind {
        self.stage
    }

    fn invoke(&self, input: &KernelInput<'_>) -> anyhow::Result<KernelOutput> {
        if self.stage.descriptor().output == OutputKind::Table {
            anyhow::bail!("{} produces a feature table and has no passthrough", self.stage);
        }
        let output = KernelOutput::volume(input.primary.clone());
        if self.stage.descriptor().output == OutputKind::FramesWithBoundaries {
            let shape = input.primary.frame_shape();
            return Ok(output.with_boundaries(BoundaryIndex::full(shape.depth, shape.width)));
        }
        Ok(output)
    }
}
