//! Error types for stage execution

use crate::config::ParamType;
use crate::pipeline::Product;
use crate::stage::{InputRole, StageKind};
use crate::volume_io::VolumeIoError;
use astroca_common::{ElementType, VolumeError, VolumeShape};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Missing {role} file: {}", path.display())]
    MissingInput { role: InputRole, path: PathBuf },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(#[from] ShapeMismatch),

    #[error("Boundary shape mismatch: {0}")]
    BoundaryShapeMismatch(#[from] BoundaryMismatch),

    #[error("Parameter '{key}' expects {expected}, got {value:?}")]
    ConfigType {
        key: String,
        expected: ParamType,
        value: String,
    },

    #[error("{stage} requires parameter '{key}'")]
    MissingParameter { stage: StageKind, key: String },

    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("{stage} requires {role} input")]
    MissingAuxiliary { stage: StageKind, role: InputRole },

    #[error("{stage} requires a boundary index (index_xmin/index_xmax)")]
    MissingBoundaries { stage: StageKind },

    #[error("Kernel for {stage} returned no {what}")]
    MissingKernelOutput {
        stage: StageKind,
        what: &'static str,
    },

    #[error("Event count {reported} disagrees with highest label {max_label}")]
    EventCount { reported: usize, max_label: u32 },

    #[error("Event labels are not dense: label {missing} of 1..={reported} is absent")]
    EventLabelGap { reported: usize, missing: u32 },

    #[error("Feature table has {found} rows, expected {expected} dense event ids")]
    FeatureRows { expected: usize, found: usize },

    #[error("No kernel registered for {0}")]
    NoKernel(StageKind),

    #[error("Pipeline step {step} ({stage}) reads {product}, which no earlier step produces")]
    MissingProduct {
        step: usize,
        stage: StageKind,
        product: Product,
    },

    #[error("Volume I/O error: {0}")]
    VolumeIo(#[from] VolumeIoError),

    #[error("Index array error on {}: {message}", path.display())]
    IndexIo { path: PathBuf, message: String },

    #[error("Feature table error: {0}")]
    Table(#[from] csv::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised inside a kernel, passed through unchanged
    #[error(transparent)]
    Kernel(anyhow::Error),
}

/// A volume disagrees with the frame established for the run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeMismatch {
    #[error("no {role} timepoints supplied")]
    Empty { role: InputRole },

    #[error("{role} timepoint {index} has shape {found}, expected {expected}")]
    Timepoint {
        role: InputRole,
        index: usize,
        expected: VolumeShape,
        found: VolumeShape,
    },

    #[error("{role} timepoint {index} has element type {found}, expected {expected}")]
    ElementType {
        role: InputRole,
        index: usize,
        expected: ElementType,
        found: ElementType,
    },

    #[error("{role} frame {found} differs from the primary frame {expected}")]
    Auxiliary {
        role: InputRole,
        expected: VolumeShape,
        found: VolumeShape,
    },

    #[error("{stage} produced frame {found}, expected {expected}")]
    Output {
        stage: StageKind,
        expected: VolumeShape,
        found: VolumeShape,
    },
}

impl ShapeMismatch {
    /// Timepoint the mismatch was detected at, if it concerns one
    #[must_use]
    pub fn timepoint(&self) -> Option<usize> {
        match self {
            ShapeMismatch::Timepoint { index, .. } | ShapeMismatch::ElementType { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

/// A boundary index disagrees with itself or with a volume
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryMismatch {
    #[error("index_xmin has {xmin} entries but index_xmax has {xmax}")]
    PairLength { xmin: usize, xmax: usize },

    #[error("boundary index covers {boundary} depth slices but the volume has {depth}")]
    Depth { boundary: usize, depth: usize },

    #[error("depth slice {z}: column range [{xmin}, {xmax}] is not inside [0, {width})")]
    ColumnRange {
        z: usize,
        xmin: i64,
        xmax: i64,
        width: usize,
    },
}
