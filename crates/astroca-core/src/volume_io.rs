//! Volume file I/O
//!
//! Stages load and save 3D volumes through [`VolumeReader`] and
//! [`VolumeWriter`]; the framework never looks inside a file format.
//! [`TiffVolumeIo`] stores one grayscale page per depth slice, keeping the
//! element type of the samples. [`MemoryVolumeStore`] serves hosts that
//! already hold decoded frames.

use astroca_common::{ElementType, Volume3D, VolumeShape};
use ndarray::{Array3, Axis};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder, TiffValue};
use tiff::ColorType;

/// File extensions recognised as TIFF, compared case-insensitively
pub const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

/// Errors that can occur while reading or writing a volume file
#[derive(Error, Debug)]
pub enum VolumeIoError {
    #[error("Failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Failed to encode {}: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    #[error("Unsupported sample format in {}: {format}", path.display())]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("Page {page} of {} is {found:?}, expected {expected:?}", path.display())]
    PageSize {
        path: PathBuf,
        page: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("No volume stored at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Loads one timepoint from a file
pub trait VolumeReader: Send + Sync {
    fn read_volume(&self, path: &Path) -> Result<Volume3D, VolumeIoError>;

    /// Whether `path` names a readable volume
    fn contains(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Persists one timepoint to a file
pub trait VolumeWriter: Send + Sync {
    fn write_volume(&self, path: &Path, volume: &Volume3D) -> Result<(), VolumeIoError>;

    /// Move a written volume to its final path
    fn rename(&self, from: &Path, to: &Path) -> Result<(), VolumeIoError> {
        fs::rename(from, to).map_err(|source| VolumeIoError::Io {
            path: to.to_path_buf(),
            source,
        })
    }

    /// Delete a written volume
    fn remove(&self, path: &Path) -> Result<(), VolumeIoError> {
        fs::remove_file(path).map_err(|source| VolumeIoError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Whether `path` carries a TIFF extension
#[must_use]
pub fn is_tiff_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TIFF_EXTENSIONS.iter().any(|t| e.eq_ignore_ascii_case(t)))
        .unwrap_or(false)
}

/// Multi-page grayscale TIFF: page `z` holds depth slice `z`
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffVolumeIo;

impl VolumeReader for TiffVolumeIo {
    fn read_volume(&self, path: &Path) -> Result<Volume3D, VolumeIoError> {
        let decode_err = |e: tiff::TiffError| VolumeIoError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let file = File::open(path).map_err(|source| VolumeIoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(decode_err)?
            .with_limits(Limits::unlimited());

        let (width, height) = decoder.dimensions().map_err(decode_err)?;
        let mut pages = Vec::new();
        loop {
            let found = decoder.dimensions().map_err(decode_err)?;
            if found != (width, height) {
                return Err(VolumeIoError::PageSize {
                    path: path.to_path_buf(),
                    page: pages.len(),
                    expected: (width, height),
                    found,
                });
            }
            match decoder.colortype().map_err(decode_err)? {
                ColorType::Gray(_) => {}
                other => {
                    return Err(VolumeIoError::UnsupportedFormat {
                        path: path.to_path_buf(),
                        format: format!("{other:?}"),
                    })
                }
            }
            pages.push(decoder.read_image().map_err(decode_err)?);

            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(decode_err)?;
        }

        let shape = VolumeShape::new(pages.len(), height as usize, width as usize);
        concat_pages(path, shape, pages)
    }
}

macro_rules! concat_typed {
    ($path:expr, $shape:expr, $pages:expr, $variant:ident) => {{
        let mut data = Vec::with_capacity($shape.voxel_count());
        for page in $pages {
            match page {
                DecodingResult::$variant(samples) => data.extend_from_slice(&samples),
                _ => return Err(mixed_pages($path)),
            }
        }
        Volume3D::from_flat($shape, data).map_err(|e| VolumeIoError::Decode {
            path: $path.to_path_buf(),
            message: e.to_string(),
        })
    }};
}

fn mixed_pages(path: &Path) -> VolumeIoError {
    VolumeIoError::UnsupportedFormat {
        path: path.to_path_buf(),
        format: "pages with differing sample types".to_string(),
    }
}

fn concat_pages(
    path: &Path,
    shape: VolumeShape,
    pages: Vec<DecodingResult>,
) -> Result<Volume3D, VolumeIoError> {
    let element_type = match pages.first() {
        Some(DecodingResult::U8(_)) => ElementType::U8,
        Some(DecodingResult::U16(_)) => ElementType::U16,
        Some(DecodingResult::U32(_)) => ElementType::U32,
        Some(DecodingResult::F32(_)) => ElementType::F32,
        Some(DecodingResult::F64(_)) => ElementType::F64,
        Some(_) => {
            return Err(VolumeIoError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: "signed or 64-bit integer samples".to_string(),
            })
        }
        None => {
            return Err(VolumeIoError::Decode {
                path: path.to_path_buf(),
                message: "file contains no pages".to_string(),
            })
        }
    };
    match element_type {
        ElementType::U8 => concat_typed!(path, shape, pages, U8),
        ElementType::U16 => concat_typed!(path, shape, pages, U16),
        ElementType::U32 => concat_typed!(path, shape, pages, U32),
        ElementType::F32 => concat_typed!(path, shape, pages, F32),
        ElementType::F64 => concat_typed!(path, shape, pages, F64),
    }
}

impl VolumeWriter for TiffVolumeIo {
    fn write_volume(&self, path: &Path, volume: &Volume3D) -> Result<(), VolumeIoError> {
        let encode_err = |e: tiff::TiffError| VolumeIoError::Encode {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if volume.shape().voxel_count() == 0 {
            return Err(VolumeIoError::Encode {
                path: path.to_path_buf(),
                message: format!("cannot store empty volume {}", volume.shape()),
            });
        }

        // Encode in memory so a failed encode never leaves a truncated file behind
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buffer).map_err(encode_err)?;
            match volume {
                Volume3D::U8(a) => write_pages::<colortype::Gray8, _>(&mut encoder, a),
                Volume3D::U16(a) => write_pages::<colortype::Gray16, _>(&mut encoder, a),
                Volume3D::U32(a) => write_pages::<colortype::Gray32, _>(&mut encoder, a),
                Volume3D::F32(a) => write_pages::<colortype::Gray32Float, _>(&mut encoder, a),
                Volume3D::F64(a) => write_pages::<colortype::Gray64Float, _>(&mut encoder, a),
            }
            .map_err(encode_err)?;
        }

        fs::write(path, buffer.into_inner()).map_err(|source| VolumeIoError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn write_pages<C, W>(
    encoder: &mut TiffEncoder<W>,
    data: &Array3<C::Inner>,
) -> tiff::TiffResult<()>
where
    C: colortype::ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let (depth, height, width) = data.dim();
    for z in 0..depth {
        let plane: Vec<C::Inner> = data.index_axis(Axis(0), z).iter().copied().collect();
        encoder.write_image::<C>(width as u32, height as u32, &plane)?;
    }
    Ok(())
}

/// In-memory volume store keyed by path
#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    volumes: Mutex<HashMap<PathBuf, Volume3D>>,
}

impl MemoryVolumeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A panicking writer cannot leave the map half-updated, so a poisoned
    /// lock is still usable
    fn volumes(&self) -> MutexGuard<'_, HashMap<PathBuf, Volume3D>> {
        self.volumes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: impl Into<PathBuf>, volume: Volume3D) {
        self.volumes().insert(path.into(), volume);
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Volume3D> {
        self.volumes().get(path).cloned()
    }

    /// Stored paths in sorted order
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.volumes().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Element type of the volume at `path`, if stored
    #[must_use]
    pub fn element_type(&self, path: &Path) -> Option<ElementType> {
        self.get(path).map(|v| v.element_type())
    }
}

impl VolumeReader for MemoryVolumeStore {
    fn read_volume(&self, path: &Path) -> Result<Volume3D, VolumeIoError> {
        self.get(path).ok_or_else(|| VolumeIoError::NotFound {
            path: path.to_path_buf(),
        })
    }

    fn contains(&self, path: &Path) -> bool {
        self.volumes().contains_key(path)
    }
}

impl VolumeWriter for MemoryVolumeStore {
    fn write_volume(&self, path: &Path, volume: &Volume3D) -> Result<(), VolumeIoError> {
        self.insert(path, volume.clone());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), VolumeIoError> {
        let mut volumes = self.volumes();
        let volume = volumes.remove(from).ok_or_else(|| VolumeIoError::NotFound {
            path: from.to_path_buf(),
        })?;
        volumes.insert(to.to_path_buf(), volume);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), VolumeIoError> {
        self.volumes()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| VolumeIoError::NotFound {
                path: path.to_path_buf(),
            })
    }
}
