use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::infrastructure::onnx_blazeface_detector::DEFAULT_CONFIDENCE;
use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_FRAME_QUEUE_CAPACITY, DEFAULT_REACTION_FACTOR,
    DEFAULT_REFERENCE_WIDTH_RATIO, DEFAULT_UPDATE_INTERVAL_SECS, MAX_UPDATE_INTERVAL_SECS,
    MIN_UPDATE_INTERVAL_SECS,
};
use crate::tracking::tracker_error::TrackerError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Invalid(#[from] TrackerError),
}

/// Tracker settings, stored as JSON. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between smoothed distance updates.
    pub update_interval_secs: f32,
    /// Weight of a new measurement when blending distances, in `(0, 1]`.
    pub reaction_factor: f32,
    /// Face width / frame width that corresponds to distance 1.0.
    pub reference_width_ratio: f32,
    /// Frames queued between capture and tracking; newer frames are dropped
    /// while the queue is full.
    pub frame_queue_capacity: usize,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence: f32,
    pub model_path: Option<PathBuf>,
    pub model_url: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            reaction_factor: DEFAULT_REACTION_FACTOR,
            reference_width_ratio: DEFAULT_REFERENCE_WIDTH_RATIO,
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            model_path: None,
            model_url: None,
        }
    }
}

impl TrackerConfig {
    /// `<config dir>/facetrack/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        validate_update_interval(self.update_interval_secs)?;
        validate_reaction_factor(self.reaction_factor)?;
        if !(self.reference_width_ratio.is_finite() && self.reference_width_ratio > 0.0) {
            return Err(TrackerError::invalid(
                "reference width ratio",
                self.reference_width_ratio,
                "must be a positive number",
            ));
        }
        if self.frame_queue_capacity == 0 {
            return Err(TrackerError::invalid(
                "frame queue capacity",
                0.0,
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(TrackerError::invalid(
                "detector confidence",
                self.detector.confidence,
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

pub fn validate_update_interval(secs: f32) -> Result<(), TrackerError> {
    // The floor keeps the smoothing deadline from firing back to back; the
    // cap keeps Duration::from_secs_f32 from overflowing.
    if (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(TrackerError::invalid(
            "update interval",
            secs,
            "must be within [0.001, 86400] seconds",
        ))
    }
}

pub fn validate_reaction_factor(factor: f32) -> Result<(), TrackerError> {
    if factor.is_finite() && factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(TrackerError::invalid(
            "reaction factor",
            factor,
            "must be within (0, 1]",
        ))
    }
}
