//! Common volume types shared by every astroca stage
//!
//! A run operates on 4D sequences indexed `(t, z, y, x)`. Individual frames are
//! 3D volumes indexed `(z, y, x)`. Both are stored densely in `ndarray` arrays,
//! tagged with the element type read from disk so a stage never silently
//! changes the precision of its input.

use ndarray::{s, Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Range, RangeInclusive};
use thiserror::Error;

/// Volume errors
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Element type mismatch: expected {expected}, found {found}")]
    ElementType {
        expected: ElementType,
        found: ElementType,
    },

    #[error("Shape mismatch: expected {expected}, found {found}")]
    Shape {
        expected: VolumeShape,
        found: VolumeShape,
    },

    #[error("Timepoint {index} out of range ({timepoints} timepoints)")]
    TimepointOutOfRange { index: usize, timepoints: usize },

    #[error("Value {value} at (t={t}, z={z}, y={y}, x={x}) is not a valid event label")]
    InvalidLabel {
        value: f64,
        t: usize,
        z: usize,
        y: usize,
        x: usize,
    },

    #[error("Buffer of {len} elements does not fit shape {shape}")]
    BufferLength { len: usize, shape: VolumeShape },

    #[error("Crop window rows {rows:?}, columns {columns:?} exceeds frame {shape}")]
    CropOutOfBounds {
        rows: Range<usize>,
        columns: Range<usize>,
        shape: VolumeShape,
    },
}

/// Result type for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;

/// Sample type of a stored volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl ElementType {
    /// Size of one sample in bytes
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spatial extent of one frame: depth (Z), height (Y), width (X)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeShape {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl VolumeShape {
    #[must_use]
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    /// Number of voxels in one frame
    #[must_use]
    pub const fn voxel_count(&self) -> usize {
        self.depth * self.height * self.width
    }

    #[must_use]
    pub const fn as_tuple(&self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }
}

impl From<(usize, usize, usize)> for VolumeShape {
    fn from((depth, height, width): (usize, usize, usize)) -> Self {
        Self::new(depth, height, width)
    }
}

impl fmt::Display for VolumeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Z={}, Y={}, X={})", self.depth, self.height, self.width)
    }
}

/// Expands `$body` once per element type, binding the inner array to `$inner`
macro_rules! dispatch {
    ($value:expr, $ty:ident, $inner:ident => $body:expr) => {
        match $value {
            $ty::U8($inner) => $body,
            $ty::U16($inner) => $body,
            $ty::U32($inner) => $body,
            $ty::F32($inner) => $body,
            $ty::F64($inner) => $body,
        }
    };
}

/// Like `dispatch!`, but rewraps the result in the same variant
macro_rules! map_variant {
    ($value:expr, $from:ident => $to:ident, $inner:ident => $body:expr) => {
        match $value {
            $from::U8($inner) => $to::U8($body),
            $from::U16($inner) => $to::U16($body),
            $from::U32($inner) => $to::U32($body),
            $from::F32($inner) => $to::F32($body),
            $from::F64($inner) => $to::F64($body),
        }
    };
}

/// One timepoint: a dense `(z, y, x)` volume
#[derive(Debug, Clone, PartialEq)]
pub enum Volume3D {
    U8(Array3<u8>),
    U16(Array3<u16>),
    U32(Array3<u32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

impl Volume3D {
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Volume3D::U8(_) => ElementType::U8,
            Volume3D::U16(_) => ElementType::U16,
            Volume3D::U32(_) => ElementType::U32,
            Volume3D::F32(_) => ElementType::F32,
            Volume3D::F64(_) => ElementType::F64,
        }
    }

    #[must_use]
    pub fn shape(&self) -> VolumeShape {
        dispatch!(self, Volume3D, a => VolumeShape::from(a.dim()))
    }

    /// Build a volume from a flat z-major buffer
    pub fn from_flat<T>(shape: VolumeShape, data: Vec<T>) -> Result<Self>
    where
        Array3<T>: Into<Volume3D>,
    {
        let len = data.len();
        let array = Array3::from_shape_vec(shape.as_tuple(), data)
            .map_err(|_| VolumeError::BufferLength { len, shape })?;
        Ok(array.into())
    }

    /// Widen every sample to `f64`
    #[must_use]
    pub fn to_f64(&self) -> Array3<f64> {
        dispatch!(self, Volume3D, a => a.mapv(f64::from))
    }
}

/// A `(t, z, y, x)` sequence; every timepoint shares one shape and element type
#[derive(Debug, Clone, PartialEq)]
pub enum Volume4D {
    U8(Array4<u8>),
    U16(Array4<u16>),
    U32(Array4<u32>),
    F32(Array4<f32>),
    F64(Array4<f64>),
}

macro_rules! impl_from_arrays {
    ($($variant:ident => $t:ty),* $(,)?) => {
        $(
            impl From<Array3<$t>> for Volume3D {
                fn from(array: Array3<$t>) -> Self {
                    Volume3D::$variant(array)
                }
            }

            impl From<Array4<$t>> for Volume4D {
                fn from(array: Array4<$t>) -> Self {
                    Volume4D::$variant(array)
                }
            }
        )*
    };
}

impl_from_arrays!(U8 => u8, U16 => u16, U32 => u32, F32 => f32, F64 => f64);

fn set_frame_typed<T: Copy>(dst: &mut Array4<T>, index: usize, src: &Array3<T>) {
    dst.index_axis_mut(Axis(0), index).assign(src);
}

fn occupancy<T: Copy + Default + PartialEq>(data: &Array4<T>) -> Array2<bool> {
    let (_, depth, _, width) = data.dim();
    let zero = T::default();
    let mut occupied = Array2::from_elem((depth, width), false);
    for ((_, z, _, x), value) in data.indexed_iter() {
        if *value != zero {
            occupied[[z, x]] = true;
        }
    }
    occupied
}

fn zero_outside<T: Copy + Default>(data: &mut Array4<T>, z: usize, keep: &RangeInclusive<usize>) {
    let zero = T::default();
    let mut slab = data.slice_mut(s![.., z, .., ..]);
    for ((_, _, x), value) in slab.indexed_iter_mut() {
        if !keep.contains(&x) {
            *value = zero;
        }
    }
}

impl Volume4D {
    /// Allocate a zero-filled sequence
    #[must_use]
    pub fn zeros(element_type: ElementType, timepoints: usize, shape: VolumeShape) -> Self {
        let dim = (timepoints, shape.depth, shape.height, shape.width);
        match element_type {
            ElementType::U8 => Volume4D::U8(Array4::from_elem(dim, 0)),
            ElementType::U16 => Volume4D::U16(Array4::from_elem(dim, 0)),
            ElementType::U32 => Volume4D::U32(Array4::from_elem(dim, 0)),
            ElementType::F32 => Volume4D::F32(Array4::from_elem(dim, 0.0)),
            ElementType::F64 => Volume4D::F64(Array4::from_elem(dim, 0.0)),
        }
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Volume4D::U8(_) => ElementType::U8,
            Volume4D::U16(_) => ElementType::U16,
            Volume4D::U32(_) => ElementType::U32,
            Volume4D::F32(_) => ElementType::F32,
            Volume4D::F64(_) => ElementType::F64,
        }
    }

    /// Number of timepoints (T)
    #[must_use]
    pub fn timepoints(&self) -> usize {
        dispatch!(self, Volume4D, a => a.dim().0)
    }

    /// Shape shared by every frame
    #[must_use]
    pub fn frame_shape(&self) -> VolumeShape {
        dispatch!(self, Volume4D, a => {
            let (_, z, y, x) = a.dim();
            VolumeShape::new(z, y, x)
        })
    }

    /// Memory held by the samples: T·Z·Y·X·element size
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.timepoints() * self.frame_shape().voxel_count() * self.element_type().size_bytes()
    }

    /// Copy `frame` into timepoint `index`
    pub fn set_frame(&mut self, index: usize, frame: &Volume3D) -> Result<()> {
        let timepoints = self.timepoints();
        if index >= timepoints {
            return Err(VolumeError::TimepointOutOfRange { index, timepoints });
        }
        let expected = self.frame_shape();
        let found = frame.shape();
        if expected != found {
            return Err(VolumeError::Shape { expected, found });
        }
        match (self, frame) {
            (Volume4D::U8(dst), Volume3D::U8(src)) => set_frame_typed(dst, index, src),
            (Volume4D::U16(dst), Volume3D::U16(src)) => set_frame_typed(dst, index, src),
            (Volume4D::U32(dst), Volume3D::U32(src)) => set_frame_typed(dst, index, src),
            (Volume4D::F32(dst), Volume3D::F32(src)) => set_frame_typed(dst, index, src),
            (Volume4D::F64(dst), Volume3D::F64(src)) => set_frame_typed(dst, index, src),
            (dst, src) => {
                return Err(VolumeError::ElementType {
                    expected: dst.element_type(),
                    found: src.element_type(),
                })
            }
        }
        Ok(())
    }

    /// Owned copy of timepoint `index`
    pub fn frame(&self, index: usize) -> Result<Volume3D> {
        let timepoints = self.timepoints();
        if index >= timepoints {
            return Err(VolumeError::TimepointOutOfRange { index, timepoints });
        }
        Ok(map_variant!(self, Volume4D => Volume3D, a => a.index_axis(Axis(0), index).to_owned()))
    }

    /// Stack frames along a new time axis; all frames must agree in shape and type
    pub fn stack(frames: &[Volume3D]) -> Result<Self> {
        let first = frames.first().ok_or(VolumeError::TimepointOutOfRange {
            index: 0,
            timepoints: 0,
        })?;
        let mut volume = Self::zeros(first.element_type(), frames.len(), first.shape());
        for (index, frame) in frames.iter().enumerate() {
            volume.set_frame(index, frame)?;
        }
        Ok(volume)
    }

    /// Keep `rows` of the height axis and `columns` of the width axis in every frame
    pub fn crop(&self, rows: Range<usize>, columns: Range<usize>) -> Result<Self> {
        let shape = self.frame_shape();
        if rows.start >= rows.end
            || columns.start >= columns.end
            || rows.end > shape.height
            || columns.end > shape.width
        {
            return Err(VolumeError::CropOutOfBounds {
                rows,
                columns,
                shape,
            });
        }
        let (r, c) = (rows, columns);
        Ok(map_variant!(self, Volume4D => Volume4D, a => a
            .slice(s![.., .., r.start..r.end, c.start..c.end])
            .to_owned()))
    }

    /// For each depth slice and column, whether any sample at any `(t, y)` is non-zero
    #[must_use]
    pub fn column_occupancy(&self) -> Array2<bool> {
        dispatch!(self, Volume4D, a => occupancy(a))
    }

    /// Zero every sample of depth slice `z` whose column lies outside `keep`
    pub fn zero_outside_columns(&mut self, z: usize, keep: RangeInclusive<usize>) {
        dispatch!(self, Volume4D, a => zero_outside(a, z, &keep))
    }

    /// Convert samples to `f32`, rounding `f64` and large `u32` values
    #[must_use]
    pub fn to_f32(&self) -> Array4<f32> {
        dispatch!(self, Volume4D, a => a.mapv(|v| v as f32))
    }

    /// Widen every sample to `f64`
    #[must_use]
    pub fn to_f64(&self) -> Array4<f64> {
        dispatch!(self, Volume4D, a => a.mapv(f64::from))
    }

    /// Interpret the samples as event labels
    ///
    /// Integer volumes convert directly. Float volumes are accepted only if every
    /// sample is a non-negative integer that fits in `u32`.
    pub fn to_labels(&self) -> Result<Array4<u32>> {
        match self {
            Volume4D::U8(a) => Ok(a.mapv(u32::from)),
            Volume4D::U16(a) => Ok(a.mapv(u32::from)),
            Volume4D::U32(a) => Ok(a.clone()),
            Volume4D::F32(a) => float_labels(
                a.indexed_iter().map(|(i, v)| (i, f64::from(*v))),
                a.raw_dim(),
            ),
            Volume4D::F64(a) => {
                float_labels(a.indexed_iter().map(|(i, v)| (i, *v)), a.raw_dim())
            }
        }
    }
}

fn float_labels(
    samples: impl Iterator<Item = ((usize, usize, usize, usize), f64)>,
    dim: ndarray::Ix4,
) -> Result<Array4<u32>> {
    let mut labels = Array4::from_elem(dim, 0u32);
    for ((t, z, y, x), value) in samples {
        if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(VolumeError::InvalidLabel { value, t, z, y, x });
        }
        labels[[t, z, y, x]] = value as u32;
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: VolumeShape, offset: u16) -> Volume3D {
        let data: Vec<u16> = (0..shape.voxel_count()).map(|i| i as u16 + offset).collect();
        Volume3D::from_flat(shape, data).unwrap()
    }

    #[test]
    fn test_stack_preserves_frames() {
        let shape = VolumeShape::new(2, 3, 4);
        let frames = vec![ramp(shape, 0), ramp(shape, 100), ramp(shape, 200)];

        let volume = Volume4D::stack(&frames).unwrap();

        assert_eq!(volume.timepoints(), 3);
        assert_eq!(volume.frame_shape(), shape);
        assert_eq!(volume.element_type(), ElementType::U16);
        for (t, frame) in frames.iter().enumerate() {
            assert_eq!(&volume.frame(t).unwrap(), frame);
        }
    }

    #[test]
    fn test_set_frame_rejects_other_element_type() {
        let shape = VolumeShape::new(1, 2, 2);
        let mut volume = Volume4D::zeros(ElementType::U16, 2, shape);
        let frame = Volume3D::from_flat(shape, vec![0.5f32; 4]).unwrap();

        let err = volume.set_frame(1, &frame).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::ElementType {
                expected: ElementType::U16,
                found: ElementType::F32
            }
        ));
    }

    #[test]
    fn test_set_frame_rejects_other_shape() {
        let mut volume = Volume4D::zeros(ElementType::U16, 1, VolumeShape::new(2, 2, 2));
        let err = volume
            .set_frame(0, &ramp(VolumeShape::new(2, 2, 3), 0))
            .unwrap_err();
        assert!(matches!(err, VolumeError::Shape { .. }));
    }

    #[test]
    fn test_resident_bytes() {
        let volume = Volume4D::zeros(ElementType::F32, 3, VolumeShape::new(5, 10, 10));
        assert_eq!(volume.resident_bytes(), 3 * 5 * 10 * 10 * 4);
    }

    #[test]
    fn test_crop_and_occupancy() {
        let mut data = Array4::<u8>::zeros((2, 2, 3, 6));
        data[[0, 0, 2, 1]] = 7;
        data[[1, 1, 1, 4]] = 9;
        let volume = Volume4D::from(data);

        let occupied = volume.column_occupancy();
        assert!(occupied[[0, 1]]);
        assert!(occupied[[1, 4]]);
        assert!(!occupied[[0, 4]]);

        let cropped = volume.crop(1..3, 1..5).unwrap();
        assert_eq!(cropped.frame_shape(), VolumeShape::new(2, 2, 4));
        match cropped {
            Volume4D::U8(a) => {
                assert_eq!(a[[0, 0, 1, 0]], 7);
                assert_eq!(a[[1, 1, 0, 3]], 9);
            }
            other => panic!("unexpected element type {}", other.element_type()),
        }

        assert!(volume.crop(0..4, 0..6).is_err());
    }

    #[test]
    fn test_zero_outside_columns() {
        let mut volume = Volume4D::from(Array4::<f32>::from_elem((1, 2, 1, 5), 1.0));
        volume.zero_outside_columns(1, 1..=3);
        let data = volume.to_f64();
        assert_eq!(data.slice(s![0, 0, 0, ..]).to_vec(), vec![1.0; 5]);
        assert_eq!(
            data.slice(s![0, 1, 0, ..]).to_vec(),
            vec![0.0, 1.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_float_labels() {
        let mut data = Array4::<f32>::zeros((1, 1, 1, 3));
        data[[0, 0, 0, 1]] = 2.0;
        assert_eq!(
            Volume4D::from(data.clone()).to_labels().unwrap()[[0, 0, 0, 1]],
            2
        );

        data[[0, 0, 0, 2]] = 1.5;
        let err = Volume4D::from(data).to_labels().unwrap_err();
        assert!(matches!(err, VolumeError::InvalidLabel { x: 2, .. }));
    }
}
