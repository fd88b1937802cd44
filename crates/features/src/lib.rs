//! Per-event feature extraction
//!
//! Turns an event label volume and the matching amplitude volume into one
//! [`FeatureRow`] per event id `1..=ids_events`.
//!
//! # Features
//! - Voxel count and physical volume (`voxels × vx × vy × vz`)
//! - Spatial footprint: distinct `(z, y, x)` positions over all timepoints
//! - Time span of the event
//! - Footprint centroid and largest footprint distance to it, in physical units
//! - Amplitude mean, median and maximum over the event's voxels
//! - Localized flag
//!
//! An event is localized when it is compact and bright
//! (`max_distance <= threshold_distance_localized` and
//! `amplitude_median >= threshold_median_localized`), or when its footprint is
//! no larger than `volume_localized`.

pub mod plugin;

use astroca_core::config::FeatureParams;
use astroca_core::{FeatureRow, FeatureTable};
use ndarray::ArrayView4;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

pub use plugin::FeatureExtractionKernel;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Label volume {labels:?} and amplitude volume {amplitude:?} differ in shape")]
    ShapeMismatch {
        labels: (usize, usize, usize, usize),
        amplitude: (usize, usize, usize, usize),
    },

    #[error("Label {label} at (t={t}, z={z}, y={y}, x={x}) exceeds ids_events={ids_events}")]
    LabelOutOfRange {
        label: u32,
        ids_events: usize,
        t: usize,
        z: usize,
        y: usize,
        x: usize,
    },

    #[error("Event {0} has no voxels")]
    EmptyEvent(u32),
}

/// Physical volume of `voxels` voxels
#[must_use]
pub fn physical_volume(voxels: usize, params: &FeatureParams) -> f64 {
    voxels as f64 * params.voxel_volume()
}

#[derive(Debug)]
struct EventAccumulator {
    voxel_count: usize,
    footprint: HashSet<(usize, usize, usize)>,
    t_start: usize,
    t_end: usize,
    amplitudes: Vec<f64>,
}

impl Default for EventAccumulator {
    fn default() -> Self {
        Self {
            voxel_count: 0,
            footprint: HashSet::new(),
            t_start: usize::MAX,
            t_end: 0,
            amplitudes: Vec::new(),
        }
    }
}

impl EventAccumulator {
    fn add(&mut self, (t, z, y, x): (usize, usize, usize, usize), amplitude: f64) {
        self.voxel_count += 1;
        self.footprint.insert((z, y, x));
        self.t_start = self.t_start.min(t);
        self.t_end = self.t_end.max(t);
        self.amplitudes.push(amplitude);
    }

    fn finish(mut self, id: u32, params: &FeatureParams) -> Result<FeatureRow, FeatureError> {
        if self.voxel_count == 0 {
            return Err(FeatureError::EmptyEvent(id));
        }

        let scale = |(z, y, x): (usize, usize, usize)| {
            (
                x as f64 * params.voxel_size_x,
                y as f64 * params.voxel_size_y,
                z as f64 * params.voxel_size_z,
            )
        };
        let n = self.footprint.len() as f64;
        let (sx, sy, sz) = self
            .footprint
            .iter()
            .map(|&p| scale(p))
            .fold((0.0, 0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1, acc.2 + p.2));
        let centroid = (sx / n, sy / n, sz / n);
        let max_distance = self
            .footprint
            .iter()
            .map(|&p| {
                let (x, y, z) = scale(p);
                ((x - centroid.0).powi(2) + (y - centroid.1).powi(2) + (z - centroid.2).powi(2))
                    .sqrt()
            })
            .fold(0.0, f64::max);

        self.amplitudes.sort_by(f64::total_cmp);
        let amplitude_mean = self.amplitudes.iter().sum::<f64>() / self.amplitudes.len() as f64;
        let amplitude_median = median(&self.amplitudes);
        let amplitude_max = self.amplitudes.last().copied().unwrap_or(0.0);

        let footprint_volume = physical_volume(self.footprint.len(), params);
        let is_localized = (max_distance <= params.threshold_distance_localized
            && amplitude_median >= params.threshold_median_localized)
            || footprint_volume <= params.volume_localized;

        Ok(FeatureRow {
            id,
            voxel_count: self.voxel_count,
            volume: physical_volume(self.voxel_count, params),
            footprint_voxels: self.footprint.len(),
            footprint_volume,
            t_start: self.t_start,
            t_end: self.t_end,
            duration: self.t_end - self.t_start + 1,
            centroid_x: centroid.0,
            centroid_y: centroid.1,
            centroid_z: centroid.2,
            max_distance,
            amplitude_mean,
            amplitude_median,
            amplitude_max,
            is_localized,
        })
    }
}

/// Median of sorted, non-empty values
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Compute one row per event id `1..=params.ids_events`
///
/// Every id must label at least one voxel and no label may exceed
/// `ids_events`.
pub fn extract_features(
    labels: ArrayView4<'_, u32>,
    amplitude: ArrayView4<'_, f64>,
    params: &FeatureParams,
) -> Result<FeatureTable, FeatureError> {
    if labels.dim() != amplitude.dim() {
        return Err(FeatureError::ShapeMismatch {
            labels: labels.dim(),
            amplitude: amplitude.dim(),
        });
    }

    let mut events: Vec<EventAccumulator> = (0..params.ids_events)
        .map(|_| EventAccumulator::default())
        .collect();
    for ((t, z, y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let slot = events
            .get_mut(label as usize - 1)
            .ok_or_else(|| FeatureError::LabelOutOfRange {
                label,
                ids_events: params.ids_events,
                t,
                z,
                y,
                x,
            })?;
        slot.add((t, z, y, x), amplitude[[t, z, y, x]]);
    }
    debug!(
        "Accumulated {} labelled voxels",
        events.iter().map(|e| e.voxel_count).sum::<usize>()
    );

    let rows = events
        .into_iter()
        .zip(1u32..)
        .map(|(event, id)| event.finish(id, params))
        .collect::<Result<Vec<_>, _>>()?;

    let localized = rows.iter().filter(|r| r.is_localized).count();
    info!(
        "Extracted features for {} events ({} localized)",
        rows.len(),
        localized
    );
    Ok(FeatureTable::new(rows))
}
