//! One tool invocation end to end, from file references to written outputs

use crate::assembler::VolumeAssembler;
use crate::boundary::BoundaryPaths;
use crate::config::{FrameworkOptions, ParamValue, Params, StageConfig};
use crate::error::StageError;
use crate::exporter::{FrameExporter, FrameNaming};
use crate::invoker::KernelInvoker;
use crate::kernel::AuxiliaryVolumes;
use crate::registry::KernelRegistry;
use crate::stage::{InputRole, StageKind};
use crate::volume_io::{TiffVolumeIo, VolumeReader, VolumeWriter};
use astroca_common::{Volume4D, VolumeShape};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// File references and parameters of one invocation
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageKind,
    /// Per-timepoint files for every role, primary included
    pub inputs: BTreeMap<InputRole, Vec<PathBuf>>,
    pub boundaries: Option<BoundaryPaths>,
    pub params: Params,
    /// Output base name, or the table path for feature extraction
    pub output: PathBuf,
    pub options: FrameworkOptions,
}

impl StageRequest {
    pub fn new(stage: StageKind, primary: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let mut inputs = BTreeMap::new();
        inputs.insert(InputRole::Primary, primary);
        Self {
            stage,
            inputs,
            boundaries: None,
            params: Params::new(),
            output: output.into(),
            options: FrameworkOptions::default(),
        }
    }

    #[must_use]
    pub fn with_auxiliary(mut self, role: InputRole, paths: Vec<PathBuf>) -> Self {
        self.inputs.insert(role, paths);
        self
    }

    #[must_use]
    pub fn with_boundaries(mut self, boundaries: BoundaryPaths) -> Self {
        self.boundaries = Some(boundaries);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: FrameworkOptions) -> Self {
        self.options = options;
        self
    }

    fn paths(&self, role: InputRole) -> &[PathBuf] {
        self.inputs.get(&role).map_or(&[], Vec::as_slice)
    }
}

/// What one invocation produced
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageKind,
    pub input_timepoints: usize,
    pub input_frame: VolumeShape,
    /// Exported frames in time order
    pub frames: Vec<PathBuf>,
    pub boundary_files: Option<BoundaryPaths>,
    pub table: Option<PathBuf>,
    pub event_count: Option<usize>,
    pub mean_noise: Option<f64>,
    pub duration: Duration,
}

/// Runs single stages against a kernel registry and a volume store
pub struct StageRunner {
    registry: Arc<KernelRegistry>,
    reader: Arc<dyn VolumeReader>,
    writer: Arc<dyn VolumeWriter>,
}

impl StageRunner {
    /// Runner reading and writing multi-page TIFF files
    pub fn new(registry: Arc<KernelRegistry>) -> Self {
        Self::with_io(registry, Arc::new(TiffVolumeIo), Arc::new(TiffVolumeIo))
    }

    pub fn with_io(
        registry: Arc<KernelRegistry>,
        reader: Arc<dyn VolumeReader>,
        writer: Arc<dyn VolumeWriter>,
    ) -> Self {
        Self {
            registry,
            reader,
            writer,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Assemble, invoke and export
    ///
    /// Parameters are checked before any file is read. All inputs are then
    /// loaded eagerly; the primary and auxiliary volumes are resident together
    /// while the kernel runs.
    pub fn run(&self, request: &StageRequest) -> Result<StageReport, StageError> {
        let start = Instant::now();
        let stage = request.stage;
        let descriptor = stage.descriptor();
        info!("=== {} ===", descriptor.name);

        let config = StageConfig::build(stage, &request.params, request.options.clone())?;
        if descriptor.needs_boundaries && request.boundaries.is_none() {
            return Err(StageError::MissingBoundaries { stage });
        }

        let assembler = VolumeAssembler::new(self.reader.as_ref());
        let primary_paths = request.paths(InputRole::Primary);
        let primary = assembler.assemble(InputRole::Primary, primary_paths)?;
        let mut owned_auxiliary: Vec<(InputRole, Volume4D)> = Vec::new();
        for &role in descriptor.auxiliary {
            let paths = request
                .inputs
                .get(&role)
                .ok_or(StageError::MissingAuxiliary { stage, role })?;
            owned_auxiliary.push((role, assembler.assemble(role, paths)?));
        }
        let boundaries = request
            .boundaries
            .as_ref()
            .map(BoundaryPaths::load)
            .transpose()?;

        let input_timepoints = primary.timepoints();
        let input_frame = primary.frame_shape();
        let resident: usize = primary.resident_bytes()
            + owned_auxiliary
                .iter()
                .map(|(_, v)| v.resident_bytes())
                .sum::<usize>();
        info!(
            "  Resident input: {:.1} MiB",
            resident as f64 / (1024.0 * 1024.0)
        );

        let config = config.resolve(input_timepoints, input_frame)?;
        let auxiliary: AuxiliaryVolumes<'_> =
            owned_auxiliary.iter().map(|(role, v)| (*role, v)).collect();
        let output = KernelInvoker::new(&self.registry).invoke(
            &config,
            &primary,
            &auxiliary,
            boundaries.as_ref(),
        )?;
        drop(auxiliary);
        drop(owned_auxiliary);
        drop(primary);

        let naming = FrameNaming::for_input(
            &request.output,
            primary_paths.first().map(PathBuf::as_path),
        );
        let exporter = FrameExporter::new(self.writer.as_ref());
        let frames = match &output.volume {
            Some(volume) => exporter.export(volume, &naming)?,
            None => Vec::new(),
        };
        // Cropped frames are only usable together with their index
        let saved = output
            .side
            .boundaries
            .as_ref()
            .map(|index| index.save(naming.dir()));
        let boundary_files = match saved {
            Some(Ok(paths)) => Some(paths),
            Some(Err(e)) => {
                exporter.discard(&frames);
                return Err(e);
            }
            None => None,
        };
        let table = match &output.side.features {
            Some(features) => {
                features.write_csv(&request.output)?;
                info!("  Wrote {} feature rows to {}", features.len(), request.output.display());
                Some(request.output.clone())
            }
            None => None,
        };

        let duration = start.elapsed();
        info!("  ✓ Completed in {:.2}s", duration.as_secs_f64());
        Ok(StageReport {
            stage,
            input_timepoints,
            input_frame,
            frames,
            boundary_files,
            table,
            event_count: output.side.event_count,
            mean_noise: output.side.mean_noise,
            duration,
        })
    }
}

/// Primary input files named `<prefix><t>.<ext>` for `t` in `0..count`
#[must_use]
pub fn numbered_paths(dir: &Path, prefix: &str, extension: &str, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|t| dir.join(format!("{prefix}{t}.{extension}")))
        .collect()
}
