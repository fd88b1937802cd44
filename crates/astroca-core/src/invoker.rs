//! Apply a registered kernel under the framework's frame contract
//!
//! Before the kernel runs, every auxiliary volume must share the primary's
//! `(Z, Y, X)` and the boundary index must cover exactly `Z` slices. After it
//! returns, volume-producing stages must have produced a volume in the input's
//! frame. Boundary computation is the exception: its output defines the frame,
//! and its index must validate against it. A reported event count `N` must
//! match the labels: exactly `1..=N` occur.

use crate::boundary::BoundaryIndex;
use crate::config::{StageConfig, StageParams};
use crate::error::{ShapeMismatch, StageError};
use crate::kernel::{AuxiliaryVolumes, KernelInput, KernelOutput};
use crate::registry::KernelRegistry;
use crate::stage::{OutputKind, StageKind};
use astroca_common::{Volume4D, VolumeShape};
use tracing::{debug, info};

pub struct KernelInvoker<'a> {
    registry: &'a KernelRegistry,
}

impl<'a> KernelInvoker<'a> {
    pub fn new(registry: &'a KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn invoke(
        &self,
        config: &StageConfig,
        primary: &Volume4D,
        auxiliary: &AuxiliaryVolumes<'_>,
        boundaries: Option<&BoundaryIndex>,
    ) -> Result<KernelOutput, StageError> {
        let stage = config.stage();
        let descriptor = stage.descriptor();
        let frame = primary.frame_shape();

        for &role in descriptor.auxiliary {
            let volume = auxiliary
                .get(role)
                .ok_or(StageError::MissingAuxiliary { stage, role })?;
            if volume.frame_shape() != frame {
                return Err(ShapeMismatch::Auxiliary {
                    role,
                    expected: frame,
                    found: volume.frame_shape(),
                }
                .into());
            }
        }

        match boundaries {
            Some(index) => index.check_depth(frame.depth)?,
            None if descriptor.needs_boundaries => {
                return Err(StageError::MissingBoundaries { stage })
            }
            None => {}
        }

        let kernel = self.registry.get(stage)?;
        debug!(
            kernel = kernel.name(),
            config = %config.to_nested(),
            "Invoking kernel"
        );
        let output = kernel
            .invoke(&KernelInput {
                primary,
                auxiliary,
                boundaries,
                config,
            })
            .map_err(StageError::Kernel)?;

        check_output(stage, frame, config, &output)?;
        if let Some(noise) = output.side.mean_noise {
            info!("  {} mean noise: {:.4}", stage, noise);
        }
        Ok(output)
    }
}

fn check_output(
    stage: StageKind,
    input_frame: VolumeShape,
    config: &StageConfig,
    output: &KernelOutput,
) -> Result<(), StageError> {
    let volume = || {
        output.volume.as_ref().ok_or(StageError::MissingKernelOutput {
            stage,
            what: "volume",
        })
    };

    match stage.descriptor().output {
        OutputKind::Frames => {
            let found = volume()?.frame_shape();
            if found != input_frame {
                return Err(ShapeMismatch::Output {
                    stage,
                    expected: input_frame,
                    found,
                }
                .into());
            }
        }
        OutputKind::FramesWithBoundaries => {
            let frame = volume()?.frame_shape();
            let index = output
                .side
                .boundaries
                .as_ref()
                .ok_or(StageError::MissingKernelOutput {
                    stage,
                    what: "boundary index",
                })?;
            index.validate(frame)?;
        }
        OutputKind::Table => {
            let table = output
                .side
                .features
                .as_ref()
                .ok_or(StageError::MissingKernelOutput {
                    stage,
                    what: "feature table",
                })?;
            if let StageParams::FeatureExtraction(params) = config.params() {
                if !table.is_dense() || table.len() != params.ids_events {
                    return Err(StageError::FeatureRows {
                        expected: params.ids_events,
                        found: table.len(),
                    });
                }
            }
        }
    }

    if let (Some(reported), Some(volume)) = (output.side.event_count, output.volume.as_ref()) {
        let labels = volume.to_labels()?;
        let max_label = labels.iter().copied().max().unwrap_or(0);
        if max_label as usize != reported {
            return Err(StageError::EventCount {
                reported,
                max_label,
            });
        }
        let mut seen = vec![false; reported + 1];
        for &label in &labels {
            seen[label as usize] = true;
        }
        if let Some(missing) = (1..=reported).find(|&id| !seen[id]) {
            return Err(StageError::EventLabelGap {
                reported,
                missing: missing as u32,
            });
        }
        info!("  {} events detected", reported);
    }
    Ok(())
}
