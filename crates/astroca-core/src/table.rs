//! Per-event feature table

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Geometry and amplitude statistics of one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: u32,
    /// Labelled voxels over all timepoints
    pub voxel_count: usize,
    pub volume: f64,
    /// Distinct `(z, y, x)` positions covered at any timepoint
    pub footprint_voxels: usize,
    pub footprint_volume: f64,
    pub t_start: usize,
    pub t_end: usize,
    pub duration: usize,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub centroid_z: f64,
    pub max_distance: f64,
    pub amplitude_mean: f64,
    pub amplitude_median: f64,
    pub amplitude_max: f64,
    pub is_localized: bool,
}

impl FeatureRow {
    /// CSV column names, in field order
    pub const HEADERS: [&'static str; 16] = [
        "id",
        "voxel_count",
        "volume",
        "footprint_voxels",
        "footprint_volume",
        "t_start",
        "t_end",
        "duration",
        "centroid_x",
        "centroid_y",
        "centroid_z",
        "max_distance",
        "amplitude_mean",
        "amplitude_median",
        "amplitude_max",
        "is_localized",
    ];
}

/// One row per event id, in id order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    #[must_use]
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&FeatureRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    /// Ids are exactly `1..=len()` in order
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.rows
            .iter()
            .enumerate()
            .all(|(i, row)| row.id as usize == i + 1)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), StageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        // serde only emits the header along with the first row
        if self.rows.is_empty() {
            writer.write_record(FeatureRow::HEADERS)?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self, StageError> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<FeatureRow>, csv::Error>>()?;
        Ok(Self { rows })
    }
}
