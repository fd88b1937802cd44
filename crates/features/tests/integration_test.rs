//! Integration tests for feature extraction from label and amplitude files

use astroca_core::{
    numbered_paths, BoundaryIndex, FeatureTable, InputRole, KernelRegistry, StageKind,
    StageRequest, StageRunner, TiffVolumeIo, Volume3D, VolumeShape, VolumeWriter,
};
use astroca_features::FeatureExtractionKernel;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_feature_stage_writes_csv() {
    let dir = TempDir::new().unwrap();
    let shape = VolumeShape::new(2, 4, 4);
    let labels = numbered_paths(dir.path(), "events", "tif", 3);
    let amplitude = numbered_paths(dir.path(), "amplitude", "tif", 3);

    for t in 0..3 {
        let mut event_frame = vec![0u16; shape.voxel_count()];
        // Event 1 lives at t=0..2 in the first two columns of z=0, event 2 only at t=2
        if t < 2 {
            event_frame[0] = 1;
            event_frame[1] = 1;
        } else {
            event_frame[shape.voxel_count() - 1] = 2;
        }
        let event_frame = Volume3D::from_flat(shape, event_frame).unwrap();
        TiffVolumeIo.write_volume(&labels[t], &event_frame).unwrap();

        let amplitude_frame =
            Volume3D::from_flat(shape, vec![(t + 1) as f32 * 3.0; shape.voxel_count()]).unwrap();
        TiffVolumeIo
            .write_volume(&amplitude[t], &amplitude_frame)
            .unwrap();
    }
    let boundaries = BoundaryIndex::full(2, 4).save(dir.path()).unwrap();

    let mut registry = KernelRegistry::new();
    registry.register(Arc::new(FeatureExtractionKernel::new()));
    let runner = StageRunner::new(Arc::new(registry));

    let table_path = dir.path().join("results").join("features_extracted.csv");
    let request = StageRequest::new(StageKind::FeatureExtraction, labels, table_path.clone())
        .with_auxiliary(InputRole::Amplitude, amplitude)
        .with_boundaries(boundaries)
        .with_param("ids_events", "2");
    let report = runner.run(&request).unwrap();

    assert!(report.frames.is_empty());
    assert_eq!(report.table.as_deref(), Some(table_path.as_path()));

    let table = FeatureTable::read_csv(&table_path).unwrap();
    assert_eq!(table.len(), 2);
    let first = table.get(1).unwrap();
    assert_eq!(first.voxel_count, 4);
    assert_eq!(first.footprint_voxels, 2);
    assert_eq!((first.t_start, first.t_end), (0, 1));
    assert!((first.amplitude_mean - 4.5).abs() < 1e-9);
    let second = table.get(2).unwrap();
    assert_eq!(second.duration, 1);
    assert!((second.amplitude_max - 9.0).abs() < 1e-9);
}
