//! Stage catalog: every tool the framework can run, with its static contract

use crate::config::ParamType;
use crate::config::ParamType as T;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A processing stage exposed as one tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    BoundaryComputation,
    BackgroundEstimation,
    DynamicImage,
    VarianceStabilization,
    ImageAmplitude,
    ActiveVoxels,
    Closing,
    MedianFilter,
    EventDetection,
    FeatureExtraction,
}

impl StageKind {
    /// Every stage, in canonical pipeline order
    pub const ALL: [StageKind; 10] = [
        StageKind::BoundaryComputation,
        StageKind::BackgroundEstimation,
        StageKind::DynamicImage,
        StageKind::VarianceStabilization,
        StageKind::ImageAmplitude,
        StageKind::ActiveVoxels,
        StageKind::Closing,
        StageKind::MedianFilter,
        StageKind::EventDetection,
        StageKind::FeatureExtraction,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StageKind::BoundaryComputation => "boundary_computation",
            StageKind::BackgroundEstimation => "background_estimation",
            StageKind::DynamicImage => "dynamic_image",
            StageKind::VarianceStabilization => "variance_stabilization",
            StageKind::ImageAmplitude => "image_amplitude",
            StageKind::ActiveVoxels => "active_voxels",
            StageKind::Closing => "closing",
            StageKind::MedianFilter => "median_filter",
            StageKind::EventDetection => "event_detection",
            StageKind::FeatureExtraction => "feature_extraction",
        }
    }

    #[must_use]
    pub fn descriptor(self) -> &'static StageDescriptor {
        &DESCRIPTORS[self as usize]
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown stage '{0}' (run `astroca stages` for the list)")]
pub struct UnknownStage(pub String);

impl FromStr for StageKind {
    type Err = UnknownStage;

    /// Accepts snake_case or kebab-case ids
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StageKind::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Role a 4D input plays in a stage invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    Primary,
    Background,
    DynamicImage,
    Amplitude,
    IndexXmin,
    IndexXmax,
}

impl InputRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InputRole::Primary => "input_image",
            InputRole::Background => "background_image",
            InputRole::DynamicImage => "dynamic_image",
            InputRole::Amplitude => "image_amplitude",
            InputRole::IndexXmin => "index_xmin",
            InputRole::IndexXmax => "index_xmax",
        }
    }
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage leaves behind besides its log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A 4D volume in the input's frame
    Frames,
    /// A 4D volume defining the run's frame, plus the boundary index
    FramesWithBoundaries,
    /// A feature table and no volume
    Table,
}

/// Default applied when a parameter is absent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Required,
    Int(i64),
    Float(f64),
    Str(&'static str),
    /// Resolved to the number of supplied timepoints
    FrameCount,
}

impl fmt::Display for ParamDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamDefault::Required => f.write_str("required"),
            ParamDefault::Int(v) => write!(f, "{v}"),
            ParamDefault::Float(v) => write!(f, "{v}"),
            ParamDefault::Str(v) => write!(f, "\"{v}\""),
            ParamDefault::FrameCount => f.write_str("number of frames"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub key: &'static str,
    pub ty: ParamType,
    pub default: ParamDefault,
    pub help: &'static str,
}

const fn param(
    key: &'static str,
    ty: ParamType,
    default: ParamDefault,
    help: &'static str,
) -> ParamSpec {
    ParamSpec {
        key,
        ty,
        default,
        help,
    }
}

/// Static contract of one stage
#[derive(Debug)]
pub struct StageDescriptor {
    pub kind: StageKind,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    /// Auxiliary 4D inputs, each in the primary's frame
    pub auxiliary: &'static [InputRole],
    pub needs_boundaries: bool,
    pub params: &'static [ParamSpec],
    pub output: OutputKind,
    /// Output base name used when the caller gives none
    pub default_output: &'static str,
}

impl StageDescriptor {
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.key == key)
    }
}

use self::ParamDefault::{Float, FrameCount, Int, Required, Str};

static DESCRIPTORS: [StageDescriptor; 10] = [
    StageDescriptor {
        kind: StageKind::BoundaryComputation,
        name: "Boundary computation",
        description: "Crop the acquisition window and compute the valid column range of every depth slice",
        category: "preprocessing",
        auxiliary: &[],
        needs_boundaries: false,
        params: &[
            param("x_min", T::Int, Required, "first column kept"),
            param("x_max", T::Int, Required, "last column kept (inclusive)"),
            param("pixel_cropped", T::Int, Required, "rows dropped from the top of every slice"),
        ],
        output: OutputKind::FramesWithBoundaries,
        default_output: "cropped.tif",
    },
    StageDescriptor {
        kind: StageKind::BackgroundEstimation,
        name: "Background estimation",
        description: "Estimate the baseline fluorescence (F0) over moving windows",
        category: "background",
        auxiliary: &[],
        needs_boundaries: true,
        params: &[
            param("moving_window", T::Int, Int(2), "frames per estimation window"),
        ],
        output: OutputKind::Frames,
        default_output: "background.tif",
    },
    StageDescriptor {
        kind: StageKind::DynamicImage,
        name: "Dynamic image",
        description: "Compute dF = F - F0 and the mean noise estimate",
        category: "signal",
        auxiliary: &[InputRole::Background],
        needs_boundaries: true,
        params: &[param(
            "time_length",
            T::Int,
            FrameCount,
            "number of frames; must match the supplied frames",
        )],
        output: OutputKind::Frames,
        default_output: "dynamic_image.tif",
    },
    StageDescriptor {
        kind: StageKind::VarianceStabilization,
        name: "Variance stabilization",
        description: "Anscombe transform of the raw intensities",
        category: "signal",
        auxiliary: &[],
        needs_boundaries: true,
        params: &[],
        output: OutputKind::Frames,
        default_output: "variance_stabilized.tif",
    },
    StageDescriptor {
        kind: StageKind::ImageAmplitude,
        name: "Image amplitude",
        description: "Inverse variance stabilization against the background estimate",
        category: "signal",
        auxiliary: &[InputRole::Background],
        needs_boundaries: true,
        params: &[],
        output: OutputKind::Frames,
        default_output: "amplitude.tif",
    },
    StageDescriptor {
        kind: StageKind::ActiveVoxels,
        name: "Active voxel detection",
        description: "Threshold the dynamic image against the noise level",
        category: "detection",
        auxiliary: &[InputRole::DynamicImage],
        needs_boundaries: true,
        params: &[param(
            "std_noise",
            T::Float,
            Float(1.169_629_1),
            "noise standard deviation",
        )],
        output: OutputKind::Frames,
        default_output: "active_voxels.tif",
    },
    StageDescriptor {
        kind: StageKind::Closing,
        name: "Morphological closing",
        description: "Spatial closing of the active voxel mask",
        category: "morphology",
        auxiliary: &[],
        needs_boundaries: true,
        params: &[
            param("radius", T::Int, Int(1), "structuring element radius"),
            param("border_mode", T::Str, Str("reflect"), "border handling"),
        ],
        output: OutputKind::Frames,
        default_output: "closed.tif",
    },
    StageDescriptor {
        kind: StageKind::MedianFilter,
        name: "Median filter",
        description: "Spherical median filter of the closed mask",
        category: "morphology",
        auxiliary: &[],
        needs_boundaries: true,
        params: &[
            param("radius", T::Float, Float(1.5), "filter radius"),
            param("border_mode", T::Str, Str("ignore"), "border handling"),
        ],
        output: OutputKind::Frames,
        default_output: "filtered.tif",
    },
    StageDescriptor {
        kind: StageKind::EventDetection,
        name: "Event detection",
        description: "Label connected 3D+time components as calcium events",
        category: "detection",
        auxiliary: &[],
        needs_boundaries: true,
        params: &[
            param("threshold_size_3d", T::Int, Int(400), "minimum event size in voxels"),
            param(
                "threshold_correlation",
                T::Float,
                Float(0.6),
                "minimum correlation for merging",
            ),
            param(
                "threshold_size_3d_remove",
                T::Int,
                Int(20),
                "components below this size are discarded",
            ),
        ],
        output: OutputKind::Frames,
        default_output: "calcium_events.tif",
    },
    StageDescriptor {
        kind: StageKind::FeatureExtraction,
        name: "Feature extraction",
        description: "Per-event geometry and amplitude statistics",
        category: "analysis",
        auxiliary: &[InputRole::Amplitude],
        needs_boundaries: true,
        params: &[
            param("ids_events", T::Int, Required, "number of events (N)"),
            param("voxel_size_x", T::Float, Float(0.1025), "voxel pitch along X"),
            param("voxel_size_y", T::Float, Float(0.1025), "voxel pitch along Y"),
            param("voxel_size_z", T::Float, Float(0.1344), "voxel pitch along Z"),
            param(
                "threshold_median_localized",
                T::Float,
                Float(4.0),
                "minimum median amplitude of a localized event",
            ),
            param(
                "threshold_distance_localized",
                T::Float,
                Float(6.0),
                "maximum spread of a localized event",
            ),
            param(
                "volume_localized",
                T::Float,
                Float(0.0434),
                "footprint volume at or below which an event is localized",
            ),
        ],
        output: OutputKind::Table,
        default_output: "features_extracted.csv",
    },
];
