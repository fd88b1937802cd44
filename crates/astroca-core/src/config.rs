//! Per-stage configuration
//!
//! Callers hand over loosely typed scalar parameters (`key=value` flags, YAML
//! maps, host tool fields). [`StageConfig::build`] coerces each key to the
//! type the stage declares in its [`StageDescriptor`](crate::stage::StageDescriptor)
//! and produces one typed parameter struct per stage. Kernels receive the typed
//! struct, or the nested JSON layout from [`StageConfig::to_nested`].

use crate::error::StageError;
use crate::stage::{ParamDefault, StageKind};
use astroca_common::VolumeShape;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Keys every stage accepts besides its own parameters
pub const FRAMEWORK_KEYS: [&str; 2] = ["save_results", "output_dir"];

/// Declared type of a stage parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Str,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "string",
        })
    }
}

/// A caller-supplied scalar before coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl ParamValue {
    fn type_error(&self, key: &str, expected: ParamType) -> StageError {
        StageError::ConfigType {
            key: key.to_string(),
            expected,
            value: self.to_string(),
        }
    }

    /// Integers, integral floats and decimal strings
    pub fn coerce_int(&self, key: &str) -> Result<i64, StageError> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            ParamValue::Float(v)
                if v.is_finite()
                    && v.fract() == 0.0
                    && *v >= i64::MIN as f64
                    && *v <= i64::MAX as f64 =>
            {
                Ok(*v as i64)
            }
            ParamValue::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.type_error(key, ParamType::Int)),
            _ => Err(self.type_error(key, ParamType::Int)),
        }
    }

    /// Integers, floats and numeric strings
    pub fn coerce_float(&self, key: &str) -> Result<f64, StageError> {
        match self {
            ParamValue::Int(v) => Ok(*v as f64),
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.type_error(key, ParamType::Float)),
            ParamValue::Bool(_) => Err(self.type_error(key, ParamType::Float)),
        }
    }

    /// Any scalar
    #[must_use]
    pub fn coerce_string(&self) -> String {
        self.to_string()
    }
}

/// Caller-supplied parameters of one invocation
pub type Params = BTreeMap<String, ParamValue>;

/// Border handling of the morphology kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderMode {
    Reflect,
    Constant,
    Nearest,
    Mirror,
    Wrap,
    Ignore,
}

impl BorderMode {
    pub const ALL: [BorderMode; 6] = [
        BorderMode::Reflect,
        BorderMode::Constant,
        BorderMode::Nearest,
        BorderMode::Mirror,
        BorderMode::Wrap,
        BorderMode::Ignore,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BorderMode::Reflect => "reflect",
            BorderMode::Constant => "constant",
            BorderMode::Nearest => "nearest",
            BorderMode::Mirror => "mirror",
            BorderMode::Wrap => "wrap",
            BorderMode::Ignore => "ignore",
        }
    }
}

impl FromStr for BorderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BorderMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = BorderMode::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown border mode '{s}' (expected one of {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryParams {
    pub x_min: usize,
    pub x_max: usize,
    pub pixel_cropped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundParams {
    pub moving_window: usize,
}

/// Estimator settings the background kernel always runs with
pub const BACKGROUND_METHOD: &str = "percentile";
pub const BACKGROUND_METHOD2: &str = "Med";
pub const BACKGROUND_PERCENTILE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicImageParams {
    /// `None` until resolved against the supplied frames
    pub time_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveVoxelParams {
    pub std_noise: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosingParams {
    pub radius: usize,
    pub border_mode: BorderMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedianFilterParams {
    pub radius: f64,
    pub border_mode: BorderMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDetectionParams {
    pub threshold_size_3d: usize,
    #[serde(rename = "threshold_corr")]
    pub threshold_correlation: f64,
    #[serde(rename = "threshold_size_3d_removed")]
    pub threshold_size_3d_remove: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureParams {
    pub ids_events: usize,
    pub voxel_size_x: f64,
    pub voxel_size_y: f64,
    pub voxel_size_z: f64,
    pub threshold_median_localized: f64,
    pub threshold_distance_localized: f64,
    pub volume_localized: f64,
}

impl FeatureParams {
    /// Physical volume of one voxel
    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        self.voxel_size_x * self.voxel_size_y * self.voxel_size_z
    }
}

/// Typed parameters, one variant per stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageParams {
    BoundaryComputation(BoundaryParams),
    BackgroundEstimation(BackgroundParams),
    DynamicImage(DynamicImageParams),
    VarianceStabilization,
    ImageAmplitude,
    ActiveVoxels(ActiveVoxelParams),
    Closing(ClosingParams),
    MedianFilter(MedianFilterParams),
    EventDetection(EventDetectionParams),
    FeatureExtraction(FeatureParams),
}

impl StageParams {
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            StageParams::BoundaryComputation(_) => StageKind::BoundaryComputation,
            StageParams::BackgroundEstimation(_) => StageKind::BackgroundEstimation,
            StageParams::DynamicImage(_) => StageKind::DynamicImage,
            StageParams::VarianceStabilization => StageKind::VarianceStabilization,
            StageParams::ImageAmplitude => StageKind::ImageAmplitude,
            StageParams::ActiveVoxels(_) => StageKind::ActiveVoxels,
            StageParams::Closing(_) => StageKind::Closing,
            StageParams::MedianFilter(_) => StageKind::MedianFilter,
            StageParams::EventDetection(_) => StageKind::EventDetection,
            StageParams::FeatureExtraction(_) => StageKind::FeatureExtraction,
        }
    }

    fn from_params(stage: StageKind, params: &Params) -> Result<Self, StageError> {
        let r = ParamReader::new(stage, params);
        Ok(match stage {
            StageKind::BoundaryComputation => {
                let p = BoundaryParams {
                    x_min: r.count("x_min")?,
                    x_max: r.count("x_max")?,
                    pixel_cropped: r.count("pixel_cropped")?,
                };
                if p.x_min > p.x_max {
                    return Err(invalid(
                        "x_min",
                        format!("x_min {} exceeds x_max {}", p.x_min, p.x_max),
                    ));
                }
                StageParams::BoundaryComputation(p)
            }
            StageKind::BackgroundEstimation => {
                StageParams::BackgroundEstimation(BackgroundParams {
                    moving_window: r.positive("moving_window")?,
                })
            }
            StageKind::DynamicImage => StageParams::DynamicImage(DynamicImageParams {
                time_length: r.optional_positive("time_length")?,
            }),
            StageKind::VarianceStabilization => StageParams::VarianceStabilization,
            StageKind::ImageAmplitude => StageParams::ImageAmplitude,
            StageKind::ActiveVoxels => StageParams::ActiveVoxels(ActiveVoxelParams {
                std_noise: r.non_negative("std_noise")?,
            }),
            StageKind::Closing => StageParams::Closing(ClosingParams {
                radius: r.count("radius")?,
                border_mode: r.border_mode("border_mode")?,
            }),
            StageKind::MedianFilter => StageParams::MedianFilter(MedianFilterParams {
                radius: r.non_negative("radius")?,
                border_mode: r.border_mode("border_mode")?,
            }),
            StageKind::EventDetection => {
                let p = EventDetectionParams {
                    threshold_size_3d: r.count("threshold_size_3d")?,
                    threshold_correlation: r.float("threshold_correlation")?,
                    threshold_size_3d_remove: r.count("threshold_size_3d_remove")?,
                };
                if !(-1.0..=1.0).contains(&p.threshold_correlation) {
                    return Err(invalid("threshold_correlation", "must lie in [-1, 1]"));
                }
                StageParams::EventDetection(p)
            }
            StageKind::FeatureExtraction => StageParams::FeatureExtraction(FeatureParams {
                ids_events: r.count("ids_events")?,
                voxel_size_x: r.positive_float("voxel_size_x")?,
                voxel_size_y: r.positive_float("voxel_size_y")?,
                voxel_size_z: r.positive_float("voxel_size_z")?,
                threshold_median_localized: r.float("threshold_median_localized")?,
                threshold_distance_localized: r.non_negative("threshold_distance_localized")?,
                volume_localized: r.non_negative("volume_localized")?,
            }),
        })
    }

    /// Section name and body in the nested kernel layout
    fn section(&self) -> (&'static str, serde_json::Value) {
        match self {
            StageParams::BoundaryComputation(p) => ("preprocessing", json!(p)),
            StageParams::BackgroundEstimation(p) => (
                "background_estimation",
                json!({
                    "moving_window": p.moving_window,
                    "method": BACKGROUND_METHOD,
                    "method2": BACKGROUND_METHOD2,
                    "percentile": BACKGROUND_PERCENTILE,
                }),
            ),
            StageParams::DynamicImage(p) => ("dynamic_image", json!(p)),
            StageParams::VarianceStabilization => ("variance_stabilization", json!({})),
            StageParams::ImageAmplitude => ("image_amplitude", json!({})),
            StageParams::ActiveVoxels(p) => ("active_voxels", json!(p)),
            StageParams::Closing(p) => ("closing_in_space", json!(p)),
            StageParams::MedianFilter(p) => ("median_filter", json!(p)),
            StageParams::EventDetection(p) => ("events_extraction", json!(p)),
            StageParams::FeatureExtraction(p) => ("features_extraction", json!(p)),
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> StageError {
    StageError::InvalidParameter {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Looks up parameters with the stage's declared defaults
struct ParamReader<'a> {
    stage: StageKind,
    params: &'a Params,
}

impl<'a> ParamReader<'a> {
    fn new(stage: StageKind, params: &'a Params) -> Self {
        let descriptor = stage.descriptor();
        for key in params.keys() {
            if descriptor.param(key).is_none() && !FRAMEWORK_KEYS.contains(&key.as_str()) {
                debug!(stage = %stage, key = %key, "Ignoring unknown parameter");
            }
        }
        Self { stage, params }
    }

    /// `Ok(None)` only for parameters defaulting to the frame count
    fn value(&self, key: &str) -> Result<Option<ParamValue>, StageError> {
        if let Some(value) = self.params.get(key) {
            return Ok(Some(value.clone()));
        }
        let default = self
            .stage
            .descriptor()
            .param(key)
            .map_or(ParamDefault::Required, |spec| spec.default);
        match default {
            ParamDefault::Required => Err(StageError::MissingParameter {
                stage: self.stage,
                key: key.to_string(),
            }),
            ParamDefault::Int(v) => Ok(Some(ParamValue::Int(v))),
            ParamDefault::Float(v) => Ok(Some(ParamValue::Float(v))),
            ParamDefault::Str(v) => Ok(Some(ParamValue::from(v))),
            ParamDefault::FrameCount => Ok(None),
        }
    }

    fn required(&self, key: &str) -> Result<ParamValue, StageError> {
        self.value(key)?.ok_or_else(|| StageError::MissingParameter {
            stage: self.stage,
            key: key.to_string(),
        })
    }

    fn to_count(key: &str, value: i64) -> Result<usize, StageError> {
        usize::try_from(value).map_err(|_| invalid(key, format!("{value} is negative")))
    }

    fn count(&self, key: &str) -> Result<usize, StageError> {
        Self::to_count(key, self.required(key)?.coerce_int(key)?)
    }

    fn positive(&self, key: &str) -> Result<usize, StageError> {
        match self.count(key)? {
            0 => Err(invalid(key, "must be at least 1")),
            n => Ok(n),
        }
    }

    fn optional_positive(&self, key: &str) -> Result<Option<usize>, StageError> {
        match self.value(key)? {
            None => Ok(None),
            Some(value) => match Self::to_count(key, value.coerce_int(key)?)? {
                0 => Err(invalid(key, "must be at least 1")),
                n => Ok(Some(n)),
            },
        }
    }

    fn float(&self, key: &str) -> Result<f64, StageError> {
        let value = self.required(key)?.coerce_float(key)?;
        if value.is_nan() {
            return Err(invalid(key, "must be a number"));
        }
        Ok(value)
    }

    fn non_negative(&self, key: &str) -> Result<f64, StageError> {
        let value = self.float(key)?;
        if value < 0.0 {
            return Err(invalid(key, format!("{value} is negative")));
        }
        Ok(value)
    }

    fn positive_float(&self, key: &str) -> Result<f64, StageError> {
        let value = self.float(key)?;
        if value <= 0.0 || !value.is_finite() {
            return Err(invalid(key, format!("{value} is not a positive length")));
        }
        Ok(value)
    }

    fn string(&self, key: &str) -> Result<String, StageError> {
        Ok(self.required(key)?.coerce_string())
    }

    fn border_mode(&self, key: &str) -> Result<BorderMode, StageError> {
        self.string(key)?
            .parse()
            .map_err(|reason: String| invalid(key, reason))
    }
}

/// Framework keys threaded to every kernel unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkOptions {
    pub save_results: bool,
    pub output_dir: Option<PathBuf>,
}

/// Configuration of one stage invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    params: StageParams,
    options: FrameworkOptions,
}

impl StageConfig {
    /// Coerce `params` against the stage's declared schema
    pub fn build(
        stage: StageKind,
        params: &Params,
        options: FrameworkOptions,
    ) -> Result<Self, StageError> {
        Ok(Self {
            params: StageParams::from_params(stage, params)?,
            options,
        })
    }

    #[must_use]
    pub fn stage(&self) -> StageKind {
        self.params.stage()
    }

    #[must_use]
    pub fn params(&self) -> &StageParams {
        &self.params
    }

    #[must_use]
    pub fn options(&self) -> &FrameworkOptions {
        &self.options
    }

    /// Settle the parameters that depend on the assembled input
    ///
    /// An absent `time_length` becomes the number of timepoints; an explicit
    /// one must match it. The crop window of boundary computation must fit
    /// inside the frame.
    pub fn resolve(mut self, timepoints: usize, frame: VolumeShape) -> Result<Self, StageError> {
        match &mut self.params {
            StageParams::DynamicImage(p) => match p.time_length {
                None => p.time_length = Some(timepoints),
                Some(n) if n != timepoints => {
                    return Err(invalid(
                        "time_length",
                        format!("{n} does not match the {timepoints} supplied frames"),
                    ))
                }
                Some(_) => {}
            },
            StageParams::BoundaryComputation(p) => {
                if p.x_max >= frame.width {
                    return Err(invalid(
                        "x_max",
                        format!("column {} is outside frame {frame}", p.x_max),
                    ));
                }
                if p.pixel_cropped >= frame.height {
                    return Err(invalid(
                        "pixel_cropped",
                        format!("cropping {} rows leaves nothing of frame {frame}", p.pixel_cropped),
                    ));
                }
            }
            _ => {}
        }
        Ok(self)
    }

    /// Render the nested structure the kernels expect
    #[must_use]
    pub fn to_nested(&self) -> serde_json::Value {
        let (section, body) = self.params.section();
        let output_dir = self
            .options
            .output_dir
            .as_ref()
            .map(|dir| dir.display().to_string());
        json!({
            section: body,
            "files": { "save_results": i32::from(self.options.save_results) },
            "paths": { "output_dir": output_dir },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_int_coercion() {
        assert_eq!(ParamValue::Int(4).coerce_int("k").unwrap(), 4);
        assert_eq!(ParamValue::Float(4.0).coerce_int("k").unwrap(), 4);
        assert_eq!(ParamValue::from(" 12 ").coerce_int("k").unwrap(), 12);

        let err = ParamValue::Float(4.5).coerce_int("radius").unwrap_err();
        match err {
            StageError::ConfigType {
                key,
                expected,
                value,
            } => {
                assert_eq!(key, "radius");
                assert_eq!(expected, ParamType::Int);
                assert_eq!(value, "4.5");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(ParamValue::from("abc").coerce_int("k").is_err());
        assert!(ParamValue::Bool(true).coerce_int("k").is_err());
    }

    #[test]
    fn test_float_and_string_coercion() {
        assert_eq!(ParamValue::Int(2).coerce_float("k").unwrap(), 2.0);
        assert_eq!(ParamValue::from("0.6").coerce_float("k").unwrap(), 0.6);
        assert!(ParamValue::from("high").coerce_float("k").is_err());
        assert_eq!(ParamValue::Float(1.5).coerce_string(), "1.5");
        assert_eq!(ParamValue::Bool(false).coerce_string(), "false");
    }

    #[test]
    fn test_defaults_applied() {
        let config = StageConfig::build(
            StageKind::EventDetection,
            &Params::new(),
            FrameworkOptions::default(),
        )
        .unwrap();
        assert_eq!(
            config.params(),
            &StageParams::EventDetection(EventDetectionParams {
                threshold_size_3d: 400,
                threshold_correlation: 0.6,
                threshold_size_3d_remove: 20,
            })
        );
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = StageConfig::build(
            StageKind::BoundaryComputation,
            &params(&[("x_min", 0.into()), ("x_max", 9.into())]),
            FrameworkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StageError::MissingParameter { stage: StageKind::BoundaryComputation, ref key } if key == "pixel_cropped"
        ));
    }

    #[test]
    fn test_invalid_values() {
        let err = StageConfig::build(
            StageKind::BackgroundEstimation,
            &params(&[("moving_window", 0.into())]),
            FrameworkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidParameter { ref key, .. } if key == "moving_window"));

        let err = StageConfig::build(
            StageKind::Closing,
            &params(&[("border_mode", "sideways".into())]),
            FrameworkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidParameter { ref key, .. } if key == "border_mode"));

        let err = StageConfig::build(
            StageKind::MedianFilter,
            &params(&[("radius", (-1.0).into())]),
            FrameworkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidParameter { .. }));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = StageConfig::build(
            StageKind::Closing,
            &params(&[("radius", "2".into()), ("colour", "blue".into())]),
            FrameworkOptions::default(),
        )
        .unwrap();
        assert_eq!(
            config.params(),
            &StageParams::Closing(ClosingParams {
                radius: 2,
                border_mode: BorderMode::Reflect,
            })
        );
    }

    #[test]
    fn test_time_length_resolution() {
        let frame = VolumeShape::new(5, 10, 10);
        let config = StageConfig::build(
            StageKind::DynamicImage,
            &Params::new(),
            FrameworkOptions::default(),
        )
        .unwrap()
        .resolve(3, frame)
        .unwrap();
        assert_eq!(
            config.params(),
            &StageParams::DynamicImage(DynamicImageParams {
                time_length: Some(3)
            })
        );

        let err = StageConfig::build(
            StageKind::DynamicImage,
            &params(&[("time_length", 4.into())]),
            FrameworkOptions::default(),
        )
        .unwrap()
        .resolve(3, frame)
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidParameter { ref key, .. } if key == "time_length"));
    }

    #[test]
    fn test_crop_window_checked_against_frame() {
        let build = |x_max: i64, rows: i64| {
            StageConfig::build(
                StageKind::BoundaryComputation,
                &params(&[
                    ("x_min", 0.into()),
                    ("x_max", x_max.into()),
                    ("pixel_cropped", rows.into()),
                ]),
                FrameworkOptions::default(),
            )
            .unwrap()
            .resolve(1, VolumeShape::new(2, 8, 10))
        };
        assert!(build(9, 2).is_ok());
        assert!(build(10, 2).is_err());
        assert!(build(9, 8).is_err());

        let err = StageConfig::build(
            StageKind::BoundaryComputation,
            &params(&[
                ("x_min", 5.into()),
                ("x_max", 4.into()),
                ("pixel_cropped", 0.into()),
            ]),
            FrameworkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidParameter { ref key, .. } if key == "x_min"));
    }

    #[test]
    fn test_nested_layout() {
        let config = StageConfig::build(
            StageKind::EventDetection,
            &params(&[("threshold_size_3d", 300.into())]),
            FrameworkOptions {
                save_results: true,
                output_dir: Some(PathBuf::from("/tmp/run")),
            },
        )
        .unwrap();

        let nested = config.to_nested();
        assert_eq!(nested["events_extraction"]["threshold_size_3d"], 300);
        assert_eq!(nested["events_extraction"]["threshold_corr"], 0.6);
        assert_eq!(nested["events_extraction"]["threshold_size_3d_removed"], 20);
        assert_eq!(nested["files"]["save_results"], 1);
        assert_eq!(nested["paths"]["output_dir"], "/tmp/run");
    }

    #[test]
    fn test_background_section_carries_fixed_method() {
        let nested = StageConfig::build(
            StageKind::BackgroundEstimation,
            &Params::new(),
            FrameworkOptions::default(),
        )
        .unwrap()
        .to_nested();
        assert_eq!(nested["background_estimation"]["moving_window"], 2);
        assert_eq!(nested["background_estimation"]["method"], "percentile");
        assert_eq!(nested["background_estimation"]["method2"], "Med");
        assert_eq!(nested["background_estimation"]["percentile"], 10.0);
        assert_eq!(nested["files"]["save_results"], 0);
        assert!(nested["paths"]["output_dir"].is_null());
    }

    #[test]
    fn test_background_method_not_overridable() {
        let config = StageConfig::build(
            StageKind::BackgroundEstimation,
            &params(&[
                ("moving_window", 5i64.into()),
                ("method", "mean".into()),
                ("percentile", 50.0.into()),
            ]),
            FrameworkOptions::default(),
        )
        .unwrap();
        assert_eq!(
            config.params(),
            &StageParams::BackgroundEstimation(BackgroundParams { moving_window: 5 })
        );

        let nested = config.to_nested();
        assert_eq!(nested["background_estimation"]["method"], "percentile");
        assert_eq!(nested["background_estimation"]["percentile"], 10.0);
    }
}
