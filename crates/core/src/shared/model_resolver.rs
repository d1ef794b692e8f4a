use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("model {name} is not cached and no download URL is configured")]
    NoSource { name: String },
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Download progress: `(bytes_downloaded, total_bytes)`, total is 0 when unknown.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Locates a detector model on disk, downloading it into the cache if needed.
///
/// Lookup order: explicit path, cache directory, bundled directory, download.
pub struct ModelResolver {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelResolver {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            bundled_dir: None,
        }
    }

    /// Resolver rooted at the platform cache directory.
    pub fn with_default_cache() -> Result<Self, ModelResolveError> {
        Ok(Self::new(default_cache_dir()?))
    }

    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn resolve(
        &self,
        name: &str,
        explicit: Option<&Path>,
        url: Option<&str>,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelResolveError> {
        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(ModelResolveError::NotFound(path.to_path_buf()))
            };
        }

        let cached = self.cache_dir.join(name);
        if cached.is_file() {
            log::debug!("Using cached model {}", cached.display());
            return Ok(cached);
        }

        if let Some(bundled) = self.bundled_dir.as_ref().map(|d| d.join(name)) {
            if bundled.is_file() {
                log::debug!("Using bundled model {}", bundled.display());
                return Ok(bundled);
            }
        }

        let Some(url) = url else {
            return Err(ModelResolveError::NoSource {
                name: name.to_string(),
            });
        };

        fs::create_dir_all(&self.cache_dir).map_err(ModelResolveError::CacheDir)?;
        log::info!("Downloading {name} from {url}");
        download(url, &cached, progress)?;
        Ok(cached)
    }
}

/// `$XDG_CACHE_HOME/facetrack/models` on Linux, the data dir on macOS.
pub fn default_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join(APP_DIR_NAME).join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let download_err = |source| ModelResolveError::Download {
        url: url.to_string(),
        source,
    };

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let total = response.content_length().unwrap_or(0);
    let bytes = response.bytes().map_err(download_err)?;

    // Written under a temporary name and renamed so a failed download
    // never leaves a truncated model in the cache.
    let temp_path = dest.with_extension("part");
    let write_err = |source| ModelResolveError::Write {
        path: temp_path.clone(),
        source,
    };
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;

    let mut written: u64 = 0;
    for chunk in bytes.chunks(1024 * 1024) {
        file.write_all(chunk).map_err(write_err)?;
        written += chunk.len() as u64;
        if let Some(ref cb) = progress {
            cb(written, total);
        }
    }
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, dest).map_err(|source| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source,
    })
}
