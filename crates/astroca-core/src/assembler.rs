//! Assemble per-timepoint files into one 4D volume

use crate::error::{ShapeMismatch, StageError};
use crate::stage::InputRole;
use crate::volume_io::VolumeReader;
use astroca_common::Volume4D;
use std::path::Path;
use tracing::{debug, info};

pub struct VolumeAssembler<'a> {
    reader: &'a dyn VolumeReader,
}

impl<'a> VolumeAssembler<'a> {
    pub fn new(reader: &'a dyn VolumeReader) -> Self {
        Self { reader }
    }

    /// Load `paths` in order as timepoints `0..paths.len()`
    ///
    /// Timepoint 0 fixes the frame shape and element type; any later
    /// timepoint that disagrees fails with [`ShapeMismatch`] naming it.
    pub fn assemble<P: AsRef<Path>>(
        &self,
        role: InputRole,
        paths: &[P],
    ) -> Result<Volume4D, StageError> {
        let Some(first_path) = paths.first() else {
            return Err(ShapeMismatch::Empty { role }.into());
        };
        for path in paths {
            let path = path.as_ref();
            if !self.reader.contains(path) {
                return Err(StageError::MissingInput {
                    role,
                    path: path.to_path_buf(),
                });
            }
        }

        let first = self.reader.read_volume(first_path.as_ref())?;
        let shape = first.shape();
        let element_type = first.element_type();
        let mut volume = Volume4D::zeros(element_type, paths.len(), shape);
        volume.set_frame(0, &first)?;
        drop(first);

        for (index, path) in paths.iter().enumerate().skip(1) {
            let frame = self.reader.read_volume(path.as_ref())?;
            if frame.shape() != shape {
                return Err(ShapeMismatch::Timepoint {
                    role,
                    index,
                    expected: shape,
                    found: frame.shape(),
                }
                .into());
            }
            if frame.element_type() != element_type {
                return Err(ShapeMismatch::ElementType {
                    role,
                    index,
                    expected: element_type,
                    found: frame.element_type(),
                }
                .into());
            }
            volume.set_frame(index, &frame)?;
            debug!(role = %role, index, "Placed timepoint");
        }

        info!(
            "Assembled {} volume: T={} {} {} ({:.1} MiB resident)",
            role,
            volume.timepoints(),
            shape,
            element_type,
            volume.resident_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_io::MemoryVolumeStore;
    use astroca_common::{ElementType, Volume3D, VolumeShape};
    use std::path::PathBuf;

    fn frame(shape: VolumeShape, fill: u16) -> Volume3D {
        Volume3D::from_flat(shape, vec![fill; shape.voxel_count()]).unwrap()
    }

    fn store_with(frames: &[Volume3D]) -> (MemoryVolumeStore, Vec<PathBuf>) {
        let store = MemoryVolumeStore::new();
        let paths: Vec<PathBuf> = (0..frames.len())
            .map(|t| PathBuf::from(format!("in{t}.tif")))
            .collect();
        for (path, frame) in paths.iter().zip(frames) {
            store.insert(path.clone(), frame.clone());
        }
        (store, paths)
    }

    #[test]
    fn test_assemble_preserves_timepoints() {
        let shape = VolumeShape::new(5, 10, 10);
        let frames: Vec<_> = (0..4).map(|t| frame(shape, t * 10)).collect();
        let (store, paths) = store_with(&frames);

        let volume = VolumeAssembler::new(&store)
            .assemble(InputRole::Primary, &paths)
            .unwrap();

        assert_eq!(volume.timepoints(), 4);
        assert_eq!(volume.frame_shape(), shape);
        assert_eq!(volume.element_type(), ElementType::U16);
        for (t, expected) in frames.iter().enumerate() {
            assert_eq!(&volume.frame(t).unwrap(), expected);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let store = MemoryVolumeStore::new();
        let err = VolumeAssembler::new(&store)
            .assemble::<PathBuf>(InputRole::Background, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::ShapeMismatch(ShapeMismatch::Empty {
                role: InputRole::Background
            })
        ));
    }

    #[test]
    fn test_mismatched_timepoint_is_named() {
        let shape = VolumeShape::new(2, 4, 4);
        let frames = vec![
            frame(shape, 1),
            frame(shape, 2),
            frame(VolumeShape::new(2, 4, 5), 3),
        ];
        let (store, paths) = store_with(&frames);

        let err = VolumeAssembler::new(&store)
            .assemble(InputRole::Primary, &paths)
            .unwrap_err();
        match err {
            StageError::ShapeMismatch(mismatch) => assert_eq!(mismatch.timepoint(), Some(2)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_element_type_is_named() {
        let shape = VolumeShape::new(1, 2, 2);
        let frames = vec![
            frame(shape, 1),
            Volume3D::from_flat(shape, vec![1.0f32; 4]).unwrap(),
        ];
        let (store, paths) = store_with(&frames);

        let err = VolumeAssembler::new(&store)
            .assemble(InputRole::Primary, &paths)
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::ShapeMismatch(ShapeMismatch::ElementType { index: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file_reported_before_decoding() {
        let shape = VolumeShape::new(1, 2, 2);
        let (store, mut paths) = store_with(&[frame(shape, 1)]);
        paths.push(PathBuf::from("gone.tif"));

        let err = VolumeAssembler::new(&store)
            .assemble(InputRole::DynamicImage, &paths)
            .unwrap_err();
        match err {
            StageError::MissingInput { role, path } => {
                assert_eq!(role, InputRole::DynamicImage);
                assert_eq!(path, PathBuf::from("gone.tif"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
