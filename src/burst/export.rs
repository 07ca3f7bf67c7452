//! Writing the winning frame of a burst to durable storage.
//!
//! The winner is rotated a quarter turn, JPEG-encoded and written as
//! `max<unix_millis>.jpg` into the export directory, then registered
//! with the media index so other viewers can find it.

use super::notify::{Notifier, MSG_PHOTO_FAILED, MSG_PHOTO_SAVED};
use super::selector::BestFrame;
use image::{codecs::jpeg::JpegEncoder, imageops, RgbImage};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Clockwise rotation applied to exported images.
pub const EXPORT_ROTATION_DEGREES: u32 = 90;

/// JPEG quality of exported images.
pub const JPEG_QUALITY: u8 = 85;

/// Manifest written by [`ManifestIndex`] inside the export directory.
pub const MEDIA_INDEX_FILE: &str = "media_index.tsv";

/// Errors that can occur while exporting a burst winner.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The export directory could not be created.
    #[error("failed to create export directory {path}: {source}")]
    CreateDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// JPEG encoding failed.
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
    /// The image file could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The media index rejected the file.
    #[error("failed to register {path} with media index: {reason}")]
    Index {
        /// File being registered.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Shared index of saved media.
pub trait MediaIndex: Send {
    /// Makes a written file discoverable.
    fn register(&self, path: &Path) -> Result<(), ExportError>;
}

/// Media index kept as a tab-separated manifest next to the images.
///
/// Each registration appends `<rfc3339 local time>\t<file name>`.
#[derive(Debug, Clone)]
pub struct ManifestIndex {
    manifest: PathBuf,
}

impl ManifestIndex {
    /// Index stored as [`MEDIA_INDEX_FILE`] inside `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            manifest: directory.as_ref().join(MEDIA_INDEX_FILE),
        }
    }

    /// Location of the manifest file.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }
}

impl MediaIndex for ManifestIndex {
    fn register(&self, path: &Path) -> Result<(), ExportError> {
        let index_error = |reason: String| ExportError::Index {
            path: path.to_path_buf(),
            reason,
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| index_error("path has no file name".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.manifest)
            .map_err(|e| index_error(e.to_string()))?;
        writeln!(file, "{}\t{}", chrono::Local::now().to_rfc3339(), name)
            .map_err(|e| index_error(e.to_string()))?;
        Ok(())
    }
}

/// Writes burst winners into a directory.
pub struct Exporter {
    directory: PathBuf,
    index: Box<dyn MediaIndex>,
    notifier: Arc<dyn Notifier>,
}

impl Exporter {
    /// Exporter writing into `directory` and registering with `index`.
    pub fn new(
        directory: impl Into<PathBuf>,
        index: Box<dyn MediaIndex>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            directory: directory.into(),
            index,
            notifier,
        }
    }

    /// Exporter registering files in a [`ManifestIndex`] in the same
    /// directory.
    pub fn with_manifest(directory: impl Into<PathBuf>, notifier: Arc<dyn Notifier>) -> Self {
        let directory = directory.into();
        let index = ManifestIndex::new(&directory);
        Self::new(directory, Box::new(index), notifier)
    }

    /// Target directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Rotates, encodes and writes the winner. Returns the written path.
    ///
    /// A media index failure is logged but does not fail the export;
    /// the image is already on disk.
    pub fn export(&self, best: &BestFrame) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.directory).map_err(|source| ExportError::CreateDir {
            path: self.directory.clone(),
            source,
        })?;

        let rotated = rotate_for_export(&best.sample.image);
        let jpeg = encode_jpeg(&rotated, JPEG_QUALITY)?;
        let path = write_unique(
            &self.directory,
            chrono::Utc::now().timestamp_millis(),
            &jpeg,
        )?;

        if let Err(e) = self.index.register(&path) {
            tracing::warn!(error = %e, "Media index registration failed");
        }

        tracing::info!(
            path = %path.display(),
            bytes = jpeg.len(),
            metric = best.sample.metric,
            sequence = best.sample.sequence,
            "Burst winner exported"
        );
        Ok(path)
    }

    /// Exports and tells the user how it went.
    pub fn export_and_report(&self, best: &BestFrame) -> Result<PathBuf, ExportError> {
        let result = self.export(best);
        match &result {
            Ok(_) => self.notifier.notify(MSG_PHOTO_SAVED),
            Err(e) => {
                tracing::warn!(error = %e, "Burst export failed");
                self.notifier.notify(MSG_PHOTO_FAILED);
            }
        }
        result
    }
}

/// File name for an export made at `millis` since the Unix epoch.
pub fn export_file_name(millis: i64) -> String {
    format!("max{millis}.jpg")
}

/// Applies the fixed export rotation of [`EXPORT_ROTATION_DEGREES`].
pub fn rotate_for_export(image: &RgbImage) -> RgbImage {
    rotate_clockwise(image, EXPORT_ROTATION_DEGREES)
}

/// Rotates clockwise by a multiple of 90 degrees. Other angles leave
/// the image unrotated.
pub fn rotate_clockwise(image: &RgbImage, degrees: u32) -> RgbImage {
    match degrees % 360 {
        90 => imageops::rotate90(image),
        180 => imageops::rotate180(image),
        270 => imageops::rotate270(image),
        _ => image.clone(),
    }
}

/// Encodes an image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

/// Writes `bytes` to a fresh `max<millis>.jpg`, bumping `millis` until
/// the name is unused.
fn write_unique(directory: &Path, mut millis: i64, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    loop {
        let path = directory.join(export_file_name(millis));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                millis += 1;
                continue;
            }
            Err(source) => return Err(ExportError::Write { path, source }),
        };

        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        return match written {
            Ok(()) => Ok(path),
            Err(source) => {
                let _ = std::fs::remove_file(&path);
                Err(ExportError::Write { path, source })
            }
        };
    }
}
