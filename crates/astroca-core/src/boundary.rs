//! Per-depth-slice boundary index
//!
//! A run shares one inclusive valid column range per depth slice, persisted as
//! two `int64` NumPy arrays under fixed names. Hosts that hand each timepoint
//! its own copy of the pair name them with a trailing frame digit
//! (`index_xmin3.npy`); [`canonical_boundary_path`] maps those back to the
//! shared file.

use crate::error::{BoundaryMismatch, StageError};
use crate::stage::InputRole;
use astroca_common::VolumeShape;
use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const XMIN_FILE_NAME: &str = "index_xmin.npy";
pub const XMAX_FILE_NAME: &str = "index_xmax.npy";

/// Strip exactly one trailing digit from the file stem
///
/// `index_xmin3.npy` becomes `index_xmin.npy`; `index_xmin.npy` and a stem
/// consisting only of a digit are returned unchanged.
#[must_use]
pub fn canonical_boundary_path(path: &Path) -> PathBuf {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return path.to_path_buf();
    };
    let mut chars = stem.chars();
    let stripped = match chars.next_back() {
        Some(last) if last.is_ascii_digit() && !chars.as_str().is_empty() => chars.as_str(),
        _ => return path.to_path_buf(),
    };
    let file_name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stripped}.{ext}"),
        None => stripped.to_string(),
    };
    path.with_file_name(file_name)
}

/// The pair of files holding a boundary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryPaths {
    pub xmin: PathBuf,
    pub xmax: PathBuf,
}

impl BoundaryPaths {
    /// Canonical references, used as given
    pub fn explicit(xmin: impl Into<PathBuf>, xmax: impl Into<PathBuf>) -> Self {
        Self {
            xmin: xmin.into(),
            xmax: xmax.into(),
        }
    }

    /// Per-timepoint references, normalized with [`canonical_boundary_path`]
    pub fn from_frame_arguments(xmin: impl AsRef<Path>, xmax: impl AsRef<Path>) -> Self {
        Self {
            xmin: canonical_boundary_path(xmin.as_ref()),
            xmax: canonical_boundary_path(xmax.as_ref()),
        }
    }

    /// The fixed file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            xmin: dir.join(XMIN_FILE_NAME),
            xmax: dir.join(XMAX_FILE_NAME),
        }
    }

    /// Load both arrays; only their lengths are checked here
    pub fn load(&self) -> Result<BoundaryIndex, StageError> {
        for (role, path) in [
            (InputRole::IndexXmin, &self.xmin),
            (InputRole::IndexXmax, &self.xmax),
        ] {
            if !path.is_file() {
                return Err(StageError::MissingInput {
                    role,
                    path: path.clone(),
                });
            }
        }
        let xmin = read_index(&self.xmin)?;
        let xmax = read_index(&self.xmax)?;
        let index = BoundaryIndex::new(xmin, xmax)?;
        debug!(
            depth = index.depth(),
            xmin = %self.xmin.display(),
            "Loaded boundary index"
        );
        Ok(index)
    }
}

fn index_io(path: &Path, message: impl ToString) -> StageError {
    StageError::IndexIo {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Read a 1D integer array, accepting `int64` or `int32` storage
fn read_index(path: &Path) -> Result<Vec<i64>, StageError> {
    match read_npy::<_, Array1<i64>>(path) {
        Ok(values) => Ok(values.to_vec()),
        Err(wide) => match read_npy::<_, Array1<i32>>(path) {
            Ok(values) => Ok(values.iter().map(|&v| i64::from(v)).collect()),
            Err(_) => Err(index_io(path, wide)),
        },
    }
}

/// Inclusive valid column range `[xmin[z], xmax[z]]` of every depth slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryIndex {
    xmin: Vec<i64>,
    xmax: Vec<i64>,
}

impl BoundaryIndex {
    pub fn new(xmin: Vec<i64>, xmax: Vec<i64>) -> Result<Self, BoundaryMismatch> {
        if xmin.len() != xmax.len() {
            return Err(BoundaryMismatch::PairLength {
                xmin: xmin.len(),
                xmax: xmax.len(),
            });
        }
        Ok(Self { xmin, xmax })
    }

    /// Every slice spans all `width` columns
    #[must_use]
    pub fn full(depth: usize, width: usize) -> Self {
        let last = width.saturating_sub(1) as i64;
        Self {
            xmin: vec![0; depth],
            xmax: vec![last; depth],
        }
    }

    /// Build from per-slice ranges
    pub fn from_ranges(ranges: impl IntoIterator<Item = RangeInclusive<usize>>) -> Self {
        let (xmin, xmax) = ranges
            .into_iter()
            .map(|r| (*r.start() as i64, *r.end() as i64))
            .unzip();
        Self { xmin, xmax }
    }

    /// Number of depth slices covered
    #[must_use]
    pub fn depth(&self) -> usize {
        self.xmin.len()
    }

    #[must_use]
    pub fn xmin(&self) -> &[i64] {
        &self.xmin
    }

    #[must_use]
    pub fn xmax(&self) -> &[i64] {
        &self.xmax
    }

    /// Valid columns of slice `z`, if the entry is a well-formed range
    #[must_use]
    pub fn columns(&self, z: usize) -> Option<RangeInclusive<usize>> {
        let lo = usize::try_from(*self.xmin.get(z)?).ok()?;
        let hi = usize::try_from(*self.xmax.get(z)?).ok()?;
        (lo <= hi).then_some(lo..=hi)
    }

    /// The index must cover exactly `depth` slices
    pub fn check_depth(&self, depth: usize) -> Result<(), BoundaryMismatch> {
        if self.depth() != depth {
            return Err(BoundaryMismatch::Depth {
                boundary: self.depth(),
                depth,
            });
        }
        Ok(())
    }

    /// Full invariant: one entry per slice and `0 <= xmin <= xmax < X`
    pub fn validate(&self, shape: VolumeShape) -> Result<(), BoundaryMismatch> {
        self.check_depth(shape.depth)?;
        for (z, (&xmin, &xmax)) in self.xmin.iter().zip(&self.xmax).enumerate() {
            let in_frame = xmin >= 0 && xmin <= xmax && (xmax as u64) < shape.width as u64;
            if !in_frame {
                return Err(BoundaryMismatch::ColumnRange {
                    z,
                    xmin,
                    xmax,
                    width: shape.width,
                });
            }
        }
        Ok(())
    }

    /// Persist under the canonical names in `dir`
    pub fn save(&self, dir: &Path) -> Result<BoundaryPaths, StageError> {
        std::fs::create_dir_all(dir)?;
        let paths = BoundaryPaths::in_dir(dir);
        write_npy(&paths.xmin, &Array1::from_vec(self.xmin.clone()))
            .map_err(|e| index_io(&paths.xmin, e))?;
        if let Err(e) = write_npy(&paths.xmax, &Array1::from_vec(self.xmax.clone())) {
            // xmin alone is never a valid pair
            let _ = std::fs::remove_file(&paths.xmin);
            return Err(index_io(&paths.xmax, e));
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_canonical_path_strips_one_digit() {
        assert_eq!(
            canonical_boundary_path(Path::new("run/index_xmin3.npy")),
            PathBuf::from("run/index_xmin.npy")
        );
        assert_eq!(
            canonical_boundary_path(Path::new("index_xmin.npy")),
            PathBuf::from("index_xmin.npy")
        );
        // Only the last digit belongs to the frame id
        assert_eq!(
            canonical_boundary_path(Path::new("index_xmax12.npy")),
            PathBuf::from("index_xmax1.npy")
        );
        assert_eq!(
            canonical_boundary_path(Path::new("7.npy")),
            PathBuf::from("7.npy")
        );
    }

    #[test]
    fn test_frame_arguments_normalized() {
        let paths = BoundaryPaths::from_frame_arguments("d/index_xmin0.npy", "d/index_xmax0.npy");
        assert_eq!(paths, BoundaryPaths::in_dir("d"));
        let explicit = BoundaryPaths::explicit("d/index_xmin0.npy", "d/index_xmax0.npy");
        assert_eq!(explicit.xmin, PathBuf::from("d/index_xmin0.npy"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let index = BoundaryIndex::new(vec![0, 1, 2], vec![9, 8, 7]).unwrap();

        let paths = index.save(dir.path()).unwrap();
        assert!(paths.xmin.ends_with(XMIN_FILE_NAME));
        assert_eq!(paths.load().unwrap(), index);
    }

    #[test]
    fn test_load_rejects_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let paths = BoundaryPaths::in_dir(dir.path());
        write_npy(&paths.xmin, &Array1::from_vec(vec![0i64; 5])).unwrap();
        write_npy(&paths.xmax, &Array1::from_vec(vec![9i64; 4])).unwrap();

        let err = paths.load().unwrap_err();
        assert!(matches!(
            err,
            StageError::BoundaryShapeMismatch(BoundaryMismatch::PairLength { xmin: 5, xmax: 4 })
        ));
    }

    #[test]
    fn test_load_accepts_int32() {
        let dir = TempDir::new().unwrap();
        let paths = BoundaryPaths::in_dir(dir.path());
        write_npy(&paths.xmin, &Array1::from_vec(vec![1i32, 2])).unwrap();
        write_npy(&paths.xmax, &Array1::from_vec(vec![5i32, 6])).unwrap();

        let index = paths.load().unwrap();
        assert_eq!(index.xmin(), &[1, 2]);
        assert_eq!(index.xmax(), &[5, 6]);
    }

    #[test]
    fn test_load_names_missing_file() {
        let dir = TempDir::new().unwrap();
        let paths = BoundaryPaths::in_dir(dir.path());
        write_npy(&paths.xmin, &Array1::from_vec(vec![0i64])).unwrap();

        let err = paths.load().unwrap_err();
        assert!(matches!(
            err,
            StageError::MissingInput {
                role: InputRole::IndexXmax,
                ..
            }
        ));
    }

    #[test]
    fn test_validate() {
        let shape = VolumeShape::new(2, 4, 10);
        assert!(BoundaryIndex::full(2, 10).validate(shape).is_ok());

        let err = BoundaryIndex::full(3, 10).validate(shape).unwrap_err();
        assert_eq!(err, BoundaryMismatch::Depth { boundary: 3, depth: 2 });

        let err = BoundaryIndex::new(vec![0, 4], vec![9, 10])
            .unwrap()
            .validate(shape)
            .unwrap_err();
        assert!(matches!(err, BoundaryMismatch::ColumnRange { z: 1, .. }));

        let err = BoundaryIndex::new(vec![5, -1], vec![4, 3])
            .unwrap()
            .validate(shape)
            .unwrap_err();
        assert!(matches!(err, BoundaryMismatch::ColumnRange { z: 0, .. }));
    }

    #[test]
    fn test_columns() {
        let index = BoundaryIndex::from_ranges([2..=5, 0..=9]);
        assert_eq!(index.columns(0), Some(2..=5));
        assert_eq!(index.columns(1), Some(0..=9));
        assert_eq!(index.columns(2), None);
    }

    #[test]
    fn test_failed_save_leaves_no_half_pair() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("index_xmax.npy")).unwrap();

        let err = BoundaryIndex::full(2, 5).save(dir.path()).unwrap_err();

        assert!(matches!(err, StageError::IndexIo { .. }));
        assert!(!dir.path().join("index_xmin.npy").exists());
    }
}
