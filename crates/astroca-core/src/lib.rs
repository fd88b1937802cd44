//! Astroca Core - stage framework for calcium-imaging analysis
//!
//! Each analysis stage reads a time series stored as one 3D volume per
//! timepoint, stacks it into a `(t, z, y, x)` volume, hands it to a numerical
//! kernel together with auxiliary volumes, the per-slice boundary index and a
//! validated configuration, and writes the result back out one file per
//! timepoint.
//!
//! The numerical kernels themselves live outside this crate. They implement
//! [`Kernel`] and are looked up in a [`KernelRegistry`] by [`StageKind`].
//!
//! # Memory
//!
//! Inputs are loaded eagerly. During a [`StageRunner::run`] the primary volume
//! and every auxiliary volume of the stage are resident at once, plus the
//! kernel's output. A [`Pipeline`] additionally keeps every named product of
//! the run resident until it finishes.

pub mod assembler;
pub mod boundary;
pub mod config;
pub mod error;
pub mod exporter;
pub mod invoker;
pub mod kernel;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod table;
pub mod volume_io;

pub use assembler::VolumeAssembler;
pub use boundary::{BoundaryIndex, BoundaryPaths, XMAX_FILE_NAME, XMIN_FILE_NAME};
pub use config::{
    BorderMode, FeatureParams, FrameworkOptions, ParamType, ParamValue, Params, StageConfig,
    StageParams,
};
pub use error::{BoundaryMismatch, ShapeMismatch, StageError};
pub use exporter::{FrameExporter, FrameNaming};
pub use invoker::KernelInvoker;
pub use kernel::{
    AuxiliaryVolumes, Kernel, KernelInput, KernelOutput, PassthroughKernel, SideOutputs,
};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineStep, Product};
pub use registry::KernelRegistry;
pub use runner::{numbered_paths, StageReport, StageRequest, StageRunner};
pub use stage::{InputRole, OutputKind, StageDescriptor, StageKind, UnknownStage};
pub use table::{FeatureRow, FeatureTable};
pub use volume_io::{MemoryVolumeStore, TiffVolumeIo, VolumeIoError, VolumeReader, VolumeWriter};

pub use astroca_common::{ElementType, Volume3D, Volume4D, VolumeShape};
