//! End-to-end tests of single stage invocations on real TIFF and npy files

use astroca_core::{
    numbered_paths, BoundaryIndex, BoundaryMismatch, BoundaryPaths, ElementType, FrameExporter,
    FrameNaming, InputRole, KernelRegistry, StageError, StageKind, StageRequest, StageRunner,
    TiffVolumeIo, Volume3D, VolumeAssembler, VolumeShape, VolumeWriter,
};
use ndarray::Array1;
use ndarray_npy::write_npy;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn write_frames(paths: &[PathBuf], shape: VolumeShape) {
    for (t, path) in paths.iter().enumerate() {
        let data: Vec<u16> = (0..shape.voxel_count())
            .map(|i| (i * 3 + t * 1000) as u16)
            .collect();
        let frame = Volume3D::from_flat(shape, data).unwrap();
        TiffVolumeIo.write_volume(path, &frame).unwrap();
    }
}

fn passthrough_runner() -> StageRunner {
    StageRunner::new(Arc::new(KernelRegistry::new().with_passthrough_fallback()))
}

#[test]
fn test_noop_stage_writes_one_file_per_timepoint() {
    let dir = TempDir::new().unwrap();
    let input_dir = dir.path().join("input");
    fs::create_dir_all(&input_dir).unwrap();
    let inputs = numbered_paths(&input_dir, "frame", "tiff", 3);
    write_frames(&inputs, VolumeShape::new(5, 10, 10));
    let boundaries = BoundaryIndex::new(vec![0; 5], vec![9; 5])
        .unwrap()
        .save(&input_dir)
        .unwrap();

    let out_dir = dir.path().join("results");
    let request = StageRequest::new(StageKind::MedianFilter, inputs, out_dir.join("out"))
        .with_boundaries(boundaries);
    let report = passthrough_runner().run(&request).unwrap();

    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["out0.tiff", "out1.tiff", "out2.tiff"]);
    assert_eq!(report.frames, numbered_paths(&out_dir, "out", "tiff", 3));
    assert_eq!(report.input_timepoints, 3);
    assert_eq!(report.input_frame, VolumeShape::new(5, 10, 10));
}

#[test]
fn test_assemble_then_export_reproduces_frames() {
    let dir = TempDir::new().unwrap();
    let inputs = numbered_paths(dir.path(), "raw", "tif", 4);
    write_frames(&inputs, VolumeShape::new(3, 6, 7));

    let volume = VolumeAssembler::new(&TiffVolumeIo)
        .assemble(InputRole::Primary, &inputs)
        .unwrap();
    assert_eq!(volume.element_type(), ElementType::U16);
    let naming = FrameNaming::new(&dir.path().join("copy.tif"), "tif");
    let written = FrameExporter::new(&TiffVolumeIo)
        .export(&volume, &naming)
        .unwrap();

    assert_eq!(written.len(), inputs.len());
    for (original, copy) in inputs.iter().zip(&written) {
        assert_eq!(fs::read(original).unwrap(), fs::read(copy).unwrap());
    }
}

#[test]
fn test_mismatched_boundary_lengths_rejected_before_kernel() {
    let dir = TempDir::new().unwrap();
    let inputs = numbered_paths(dir.path(), "raw", "tif", 2);
    write_frames(&inputs, VolumeShape::new(3, 4, 4));
    let xmin = dir.path().join("index_xmin.npy");
    let xmax = dir.path().join("index_xmax.npy");
    write_npy(&xmin, &Array1::from(vec![0i64, 0, 0])).unwrap();
    write_npy(&xmax, &Array1::from(vec![3i64, 3])).unwrap();

    let out_dir = dir.path().join("out");
    let request = StageRequest::new(StageKind::Closing, inputs, out_dir.join("closed.tif"))
        .with_boundaries(BoundaryPaths::explicit(xmin, xmax));
    let err = passthrough_runner().run(&request).unwrap_err();

    assert!(matches!(
        err,
        StageError::BoundaryShapeMismatch(BoundaryMismatch::PairLength { xmin: 3, xmax: 2 })
    ));
    assert!(!out_dir.exists());
}

#[test]
fn test_per_frame_boundary_arguments_resolve_to_canonical_pair() {
    let dir = TempDir::new().unwrap();
    let inputs = numbered_paths(dir.path(), "raw", "tif", 2);
    write_frames(&inputs, VolumeShape::new(2, 3, 3));
    BoundaryIndex::full(2, 3).save(dir.path()).unwrap();

    let boundaries = BoundaryPaths::from_frame_arguments(
        dir.path().join("index_xmin1.npy"),
        dir.path().join("index_xmax1.npy"),
    );
    assert_eq!(boundaries, BoundaryPaths::in_dir(dir.path()));

    let request = StageRequest::new(
        StageKind::VarianceStabilization,
        inputs,
        dir.path().join("stabilized.tif"),
    )
    .with_boundaries(boundaries);
    let report = passthrough_runner().run(&request).unwrap();
    assert_eq!(report.frames.len(), 2);
}

#[test]
fn test_missing_timepoint_file_named_in_error() {
    let dir = TempDir::new().unwrap();
    let inputs = numbered_paths(dir.path(), "raw", "tif", 3);
    write_frames(&inputs[..2], VolumeShape::new(1, 2, 2));
    BoundaryIndex::full(1, 2).save(dir.path()).unwrap();

    let request = StageRequest::new(StageKind::Closing, inputs.clone(), dir.path().join("out"))
        .with_boundaries(BoundaryPaths::in_dir(dir.path()));
    let err = passthrough_runner().run(&request).unwrap_err();

    match err {
        StageError::MissingInput { role, path } => {
            assert_eq!(role, InputRole::Primary);
            assert_eq!(path, inputs[2]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_stage_without_kernel_is_reported() {
    let dir = TempDir::new().unwrap();
    let inputs = numbered_paths(dir.path(), "raw", "tif", 1);
    write_frames(&inputs, VolumeShape::new(1, 2, 2));
    BoundaryIndex::full(1, 2).save(dir.path()).unwrap();

    let runner = StageRunner::new(Arc::new(KernelRegistry::new()));
    let request = StageRequest::new(StageKind::EventDetection, inputs, dir.path().join("events"))
        .with_boundaries(BoundaryPaths::in_dir(dir.path()));
    let err = runner.run(&request).unwrap_err();
    assert!(matches!(err, StageError::NoKernel(StageKind::EventDetection)));
}
