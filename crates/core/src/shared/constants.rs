/// File name the detector model is cached and bundled under.
pub const BLAZEFACE_MODEL_NAME: &str = "blazeface_short_range.onnx";

/// Application directory name used for cache and config locations.
pub const APP_DIR_NAME: &str = "facetrack";

pub const DEFAULT_UPDATE_INTERVAL_SECS: f32 = 0.1;

/// Shortest accepted smoothing interval (1 ms).
pub const MIN_UPDATE_INTERVAL_SECS: f32 = 0.001;

/// Longest accepted smoothing interval (one day).
pub const MAX_UPDATE_INTERVAL_SECS: f32 = 86_400.0;
pub const DEFAULT_REACTION_FACTOR: f32 = 0.5;

/// Face width as a fraction of frame width that maps to distance 1.0.
pub const DEFAULT_REFERENCE_WIDTH_RATIO: f32 = 0.25;

/// Frames buffered between capture and tracking before late frames are dropped.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 2;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
