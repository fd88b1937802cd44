//! Split a 4D result back into per-timepoint files

use crate::error::StageError;
use crate::volume_io::{is_tiff_path, VolumeWriter};
use astroca_common::Volume4D;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension used when neither the output nor the input names one
pub const DEFAULT_EXTENSION: &str = "tif";

/// `<dir>/<base><t>.<ext>` naming of exported frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNaming {
    dir: PathBuf,
    base: String,
    extension: String,
}

impl FrameNaming {
    /// Derive the naming from an output base path
    ///
    /// A trailing `.tif`/`.tiff` (any case) is stripped from the base and kept
    /// as the extension. Otherwise the whole file name is the base and
    /// `fallback_extension` (usually the primary input's) is appended.
    pub fn new(output: &Path, fallback_extension: &str) -> Self {
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (base, extension) = if is_tiff_path(output) {
            let stem = output
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext = output
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            (stem, ext)
        } else {
            (file_name, fallback_extension.trim_start_matches('.').to_string())
        };

        Self {
            dir,
            base,
            extension,
        }
    }

    /// Naming whose fallback extension comes from a primary input file
    pub fn for_input(output: &Path, primary_input: Option<&Path>) -> Self {
        let extension = primary_input
            .and_then(|p| p.extension())
            .map_or_else(
                || DEFAULT_EXTENSION.to_string(),
                |e| e.to_string_lossy().into_owned(),
            );
        Self::new(output, &extension)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn file_name(&self, t: usize) -> String {
        if self.extension.is_empty() {
            format!("{}{t}", self.base)
        } else {
            format!("{}{t}.{}", self.base, self.extension)
        }
    }

    #[must_use]
    pub fn frame_path(&self, t: usize) -> PathBuf {
        self.dir.join(self.file_name(t))
    }
}

pub struct FrameExporter<'a> {
    writer: &'a dyn VolumeWriter,
}

impl<'a> FrameExporter<'a> {
    pub fn new(writer: &'a dyn VolumeWriter) -> Self {
        Self { writer }
    }

    /// Write one file per timepoint, returning the paths in time order
    ///
    /// Frames are written into a staging directory inside the output
    /// directory and renamed into place once all of them succeeded. On error
    /// the staging directory is removed, and frames already renamed into
    /// place are deleted again, so no frame of this export is left behind.
    pub fn export(
        &self,
        volume: &Volume4D,
        naming: &FrameNaming,
    ) -> Result<Vec<PathBuf>, StageError> {
        fs::create_dir_all(naming.dir())?;
        let staging = tempfile::Builder::new()
            .prefix(".astroca-staging-")
            .tempdir_in(naming.dir())?;

        let timepoints = volume.timepoints();
        let mut staged = Vec::with_capacity(timepoints);
        for t in 0..timepoints {
            let frame = volume.frame(t)?;
            let staged_path = staging.path().join(naming.file_name(t));
            self.writer.write_volume(&staged_path, &frame)?;
            debug!("Staged frame {} at {}", t, staged_path.display());
            staged.push((staged_path, naming.frame_path(t)));
        }

        let mut written = Vec::with_capacity(timepoints);
        for (from, to) in staged {
            if let Err(e) = self.writer.rename(&from, &to) {
                self.discard(&written);
                return Err(e.into());
            }
            written.push(to);
        }
        staging.close()?;

        info!(
            "Exported {} frames to {}",
            written.len(),
            naming.dir().display()
        );
        Ok(written)
    }

    /// Delete exported frames after a later step of the stage failed
    pub fn discard(&self, frames: &[PathBuf]) {
        for path in frames {
            if let Err(e) = self.writer.remove(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
