use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;

/// Persists captured stills and preview snapshots.
pub trait ImageWriter: Send + Sync {
    /// Encodes `frame` into `path`; the format follows the file extension.
    fn write(&self, path: &Path, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;
}

/// `<dir>/<prefix>_<seq:05>.<ext>`
pub fn numbered_path(dir: &Path, prefix: &str, seq: usize, ext: &str) -> PathBuf {
    dir.join(format!("{prefix}_{seq:05}.{ext}"))
}
