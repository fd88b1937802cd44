//! Boundary computation for calcium-imaging volumes
//!
//! Crops the raw sequence to the imaged window, finds the valid column range
//! of every depth slice and zeroes everything outside it.
//!
//! # Algorithm
//! 1. Keep columns `x_min..=x_max` and drop the first `pixel_cropped` rows.
//! 2. For each depth slice, `xmin[z]`/`xmax[z]` are the first/last column
//!    holding a non-zero sample at any `(t, y)`. A slice without any non-zero
//!    sample keeps the full width.
//! 3. Zero every sample outside `[xmin[z], xmax[z]]`.
//!
//! # Example
//! ```no_run
//! use astroca_boundaries::compute_boundaries;
//! use astroca_core::config::BoundaryParams;
//! use astroca_common::{ElementType, Volume4D, VolumeShape};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = Volume4D::zeros(ElementType::U16, 10, VolumeShape::new(32, 512, 320));
//! let params = BoundaryParams { x_min: 0, x_max: 319, pixel_cropped: 2 };
//! let result = compute_boundaries(&raw, &params)?;
//! println!("{} slices", result.index.depth());
//! # Ok(())
//! # }
//! ```

pub mod plugin;

use astroca_common::{Volume4D, VolumeError, VolumeShape};
use astroca_core::config::BoundaryParams;
use astroca_core::{BoundaryIndex, BoundaryMismatch};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use plugin::BoundaryComputationKernel;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("Crop window columns {x_min}..={x_max} does not fit width {width}")]
    ColumnWindow {
        x_min: usize,
        x_max: usize,
        width: usize,
    },

    #[error("Cannot drop {pixel_cropped} rows from height {height}")]
    RowWindow { pixel_cropped: usize, height: usize },

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("Computed boundaries are inconsistent: {0}")]
    Index(#[from] BoundaryMismatch),
}

/// Cropped, masked volume and the index describing it
#[derive(Debug, Clone)]
pub struct BoundaryResult {
    pub volume: Volume4D,
    pub index: BoundaryIndex,
    /// Depth slices without any non-zero sample
    pub empty_slices: Vec<usize>,
}

/// Crop the height and width axes of every frame
pub fn crop(volume: &Volume4D, params: &BoundaryParams) -> Result<Volume4D, BoundaryError> {
    let shape = volume.frame_shape();
    if params.x_min > params.x_max || params.x_max >= shape.width {
        return Err(BoundaryError::ColumnWindow {
            x_min: params.x_min,
            x_max: params.x_max,
            width: shape.width,
        });
    }
    if params.pixel_cropped >= shape.height {
        return Err(BoundaryError::RowWindow {
            pixel_cropped: params.pixel_cropped,
            height: shape.height,
        });
    }
    Ok(volume.crop(
        params.pixel_cropped..shape.height,
        params.x_min..params.x_max + 1,
    )?)
}

/// Per-slice occupied column range, plus the slices that had none
pub fn compute_index(volume: &Volume4D) -> (BoundaryIndex, Vec<usize>) {
    let VolumeShape { depth, width, .. } = volume.frame_shape();
    let occupancy = volume.column_occupancy();
    let mut empty = Vec::new();

    let ranges: Vec<_> = (0..depth)
        .map(|z| {
            let row = occupancy.row(z);
            let first = row.iter().position(|&occupied| occupied);
            let last = row.iter().rposition(|&occupied| occupied);
            match (first, last) {
                (Some(first), Some(last)) => first..=last,
                _ => {
                    empty.push(z);
                    0..=width.saturating_sub(1)
                }
            }
        })
        .collect();

    (BoundaryIndex::from_ranges(ranges), empty)
}

/// Zero every sample outside the index's column range of its slice
pub fn apply_mask(volume: &mut Volume4D, index: &BoundaryIndex) -> Result<(), BoundaryError> {
    index.validate(volume.frame_shape())?;
    for z in 0..index.depth() {
        if let Some(keep) = index.columns(z) {
            volume.zero_outside_columns(z, keep);
        }
    }
    Ok(())
}

/// Crop, compute the index and mask
pub fn compute_boundaries(
    volume: &Volume4D,
    params: &BoundaryParams,
) -> Result<BoundaryResult, BoundaryError> {
    let mut cropped = crop(volume, params)?;
    let shape = cropped.frame_shape();
    debug!("Cropped frame {} to {}", volume.frame_shape(), shape);

    let (index, empty_slices) = compute_index(&cropped);
    if !empty_slices.is_empty() {
        warn!(
            "{} depth slices have no signal, keeping full width for z={:?}",
            empty_slices.len(),
            empty_slices
        );
    }
    apply_mask(&mut cropped, &index)?;

    info!(
        "Boundary computation: {} slices, frame {}",
        index.depth(),
        shape
    );
    Ok(BoundaryResult {
        volume: cropped,
        index,
        empty_slices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn params(x_min: usize, x_max: usize, pixel_cropped: usize) -> BoundaryParams {
        BoundaryParams {
            x_min,
            x_max,
            pixel_cropped,
        }
    }

    /// Two timepoints, 2 slices of 3x6, signal in columns 1..=3 (z=0) and 2..=4 (z=1)
    fn sample() -> Volume4D {
        let mut a = Array4::<u16>::zeros((2, 2, 3, 6));
        a[[0, 0, 0, 1]] = 5;
        a[[1, 0, 2, 3]] = 7;
        a[[0, 1, 1, 2]] = 1;
        a[[1, 1, 1, 4]] = 9;
        Volume4D::from(a)
    }

    #[test]
    fn test_crop_window() {
        let cropped = crop(&sample(), &params(1, 4, 1)).unwrap();
        assert_eq!(cropped.frame_shape(), VolumeShape::new(2, 2, 4));
        assert_eq!(cropped.timepoints(), 2);
    }

    #[test]
    fn test_crop_rejects_bad_windows() {
        assert!(matches!(
            crop(&sample(), &params(3, 2, 0)),
            Err(BoundaryError::ColumnWindow { .. })
        ));
        assert!(matches!(
            crop(&sample(), &params(0, 6, 0)),
            Err(BoundaryError::ColumnWindow { width: 6, .. })
        ));
        assert!(matches!(
            crop(&sample(), &params(0, 5, 3)),
            Err(BoundaryError::RowWindow { height: 3, .. })
        ));
    }

    #[test]
    fn test_index_spans_occupied_columns_over_time() {
        let (index, empty) = compute_index(&sample());
        assert_eq!(index.xmin(), &[1, 2]);
        assert_eq!(index.xmax(), &[3, 4]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_empty_slice_keeps_full_width() {
        let mut a = Array4::<f32>::zeros((1, 2, 2, 5));
        a[[0, 0, 1, 2]] = 0.5;
        let (index, empty) = compute_index(&Volume4D::from(a));
        assert_eq!(index.columns(0), Some(2..=2));
        assert_eq!(index.columns(1), Some(0..=4));
        assert_eq!(empty, vec![1]);
    }

    #[test]
    fn test_compute_boundaries_masks_outside_columns() {
        let mut a = Array4::<u8>::ones((1, 1, 2, 6));
        a[[0, 0, 0, 0]] = 0;
        a[[0, 0, 1, 0]] = 0;
        let raw = Volume4D::from(a);

        let mut bad = BoundaryIndex::from_ranges([2..=3]);
        let result = compute_boundaries(&raw, &params(0, 5, 0)).unwrap();
        assert_eq!(result.index, BoundaryIndex::from_ranges([1..=5]));
        assert!(result.index.validate(result.volume.frame_shape()).is_ok());

        let mut masked = result.volume.clone();
        apply_mask(&mut masked, &bad).unwrap();
        let samples = masked.to_f64();
        assert_eq!(samples[[0, 0, 0, 1]], 0.0);
        assert_eq!(samples[[0, 0, 0, 2]], 1.0);
        assert_eq!(samples[[0, 0, 1, 3]], 1.0);
        assert_eq!(samples[[0, 0, 1, 4]], 0.0);

        bad = BoundaryIndex::from_ranges([0..=9]);
        assert!(matches!(
            apply_mask(&mut masked, &bad),
            Err(BoundaryError::Index(_))
        ));
    }

    #[test]
    fn test_masking_zeroes_samples_outside_occupied_range() {
        let mut a = Array4::<u16>::zeros((2, 1, 1, 5));
        a[[0, 0, 0, 1]] = 3;
        a[[1, 0, 0, 3]] = 4;
        let result = compute_boundaries(&Volume4D::from(a), &params(0, 4, 0)).unwrap();
        let samples = result.volume.to_f64();
        assert_eq!(samples[[0, 0, 0, 1]], 3.0);
        assert_eq!(samples[[1, 0, 0, 3]], 4.0);
        assert_eq!(result.index.columns(0), Some(1..=3));
    }
}
