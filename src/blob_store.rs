//! Durable copies of scanned and imported images.
//!
//! Files are named `test_<unix-millis>.jpg` inside the images directory. The
//! name says nothing about the content; a clash with an existing file moves
//! to the next free millisecond.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Source image not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Path is outside the image store: {0}")]
    OutsideStore(PathBuf),
}

/// File count and size of the image directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: u32,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy a transient image (picker or camera temp file) into the store.
    pub fn save_image(&self, source: &Path) -> Result<PathBuf, BlobError> {
        if !source.is_file() {
            return Err(BlobError::SourceMissing(source.to_path_buf()));
        }
        let mut input = File::open(source)?;
        let (path, mut output) = self.reserve()?;
        if let Err(e) = io::copy(&mut input, &mut output) {
            drop(output);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        tracing::info!(path = %path.display(), "Image stored");
        Ok(path)
    }

    /// Store raw image bytes (e.g. straight from the capture buffer).
    pub fn save_image_bytes(&self, bytes: &[u8]) -> Result<PathBuf, BlobError> {
        let (path, mut output) = self.reserve()?;
        if let Err(e) = output.write_all(bytes) {
            drop(output);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Image stored");
        Ok(path)
    }

    /// Whether `path` names a file inside this store.
    ///
    /// Everything after the root must be plain names; `..` and `.` segments
    /// are never treated as owned.
    pub fn owns(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rest) => {
                rest.components().next().is_some()
                    && rest.components().all(|c| matches!(c, Component::Normal(_)))
            }
            Err(_) => false,
        }
    }

    /// Delete a stored image. `Ok(false)` when it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, BlobError> {
        if !self.owns(path) {
            return Err(BlobError::OutsideStore(path.to_path_buf()));
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Count files and total bytes under the image directory.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        if self.root.exists() {
            count_recursive(&self.root, &mut stats);
        }
        stats
    }

    /// Create an empty, uniquely named file for a new image.
    fn reserve(&self) -> Result<(PathBuf, File), BlobError> {
        fs::create_dir_all(&self.root)?;
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let path = self.root.join(format!("test_{millis}.jpg"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn count_recursive(path: &Path, stats: &mut StoreStats) {
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                count_recursive(&p, stats);
            } else if let Ok(meta) = entry.metadata() {
                stats.count += 1;
                stats.total_bytes += meta.len();
            }
        }
    }
}
