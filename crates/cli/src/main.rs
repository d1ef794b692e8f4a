use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use facetrack_core::camera::domain::camera_source::CameraSource;
use facetrack_core::camera::domain::image_writer::{numbered_path, ImageWriter};
use facetrack_core::camera::domain::preview_sink::PreviewSink;
use facetrack_core::camera::infrastructure::ffmpeg_camera::FfmpegCamera;
use facetrack_core::camera::infrastructure::image_file_preview::ImageFilePreview;
use facetrack_core::camera::infrastructure::image_file_writer::ImageFileWriter;
use facetrack_core::detection::infrastructure::onnx_blazeface_detector::OnnxBlazefaceDetector;
use facetrack_core::shared::constants::{BLAZEFACE_MODEL_NAME, IMAGE_EXTENSIONS};
use facetrack_core::shared::face_rect::FaceRect;
use facetrack_core::shared::frame::Frame;
use facetrack_core::shared::model_resolver::ModelResolver;
use facetrack_core::tracking::face_tracker::{FaceTracker, TrackerState};
use facetrack_core::tracking::tracker_config::TrackerConfig;
use facetrack_core::tracking::tracker_delegate::FaceTrackerDelegate;
use facetrack_core::tracking::tracker_error::TrackerError;

/// How often the main thread checks progress while tracking.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Frames between preview image refreshes.
const PREVIEW_EVERY: usize = 5;

/// Track the dominant face in a camera or video stream and report its
/// position and distance.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// Video file, stream URL, or V4L2 device such as /dev/video0.
    input: String,

    /// JSON config file (defaults to the user config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between smoothed distance updates.
    #[arg(long)]
    update_interval: Option<f32>,

    /// Weight of new measurements when smoothing distance (0.0-1.0].
    #[arg(long)]
    reaction_factor: Option<f32>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f32>,

    /// Face width / frame width that counts as distance 1.0.
    #[arg(long)]
    reference_width: Option<f32>,

    /// BlazeFace ONNX model file; skips the cache lookup.
    #[arg(long)]
    model: Option<PathBuf>,

    /// URL to download the model from when it is not cached.
    #[arg(long)]
    model_url: Option<String>,

    /// Keep this image file updated with the annotated feed.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Save captured stills into this directory.
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Request a still every N processed frames (needs --capture-dir).
    #[arg(long)]
    capture_every: Option<usize>,

    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<usize>,

    /// Pace file input at its native frame rate.
    #[arg(long)]
    realtime: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = load_config(&cli)?;
    let detector = build_detector(&config)?;
    let camera = open_camera(&cli);

    let delegate = Arc::new(ReportingDelegate::new(cli.capture_dir.clone()));
    let mut tracker = FaceTracker::with_config(&delegate, config)?;

    let processed = Arc::new(AtomicUsize::new(0));
    tracker.add_preview(Box::new(FrameCounter(processed.clone())));
    if let Some(path) = &cli.preview {
        log::info!("Writing preview to {}", path.display());
        tracker.add_preview(Box::new(ImageFilePreview::new(
            path,
            PREVIEW_EVERY,
            Box::new(ImageFileWriter::new()),
        )));
    }

    let info = tracker.start(camera, Box::new(detector))?;
    eprintln!(
        "Tracking {} ({}x{}), update every {:.2}s",
        info.name,
        info.width,
        info.height,
        tracker.update_interval()
    );

    let mut next_capture = cli.capture_every;
    loop {
        if tracker.state() == TrackerState::Idle {
            break;
        }
        let frames = processed.load(Ordering::Relaxed);
        if let (Some(mark), Some(every)) = (next_capture, cli.capture_every) {
            if frames >= mark {
                match tracker.capture_image() {
                    Ok(()) => next_capture = Some(mark + every),
                    Err(TrackerError::NotRunning) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if cli.max_frames.is_some_and(|max| frames >= max) {
            log::info!("Reached {frames} frames");
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    tracker.stop()?;
    eprintln!(
        "Processed {} frames, saved {} still(s)",
        processed.load(Ordering::Relaxed),
        delegate.saved()
    );
    if let Some(rect) = tracker.face_rect() {
        log::info!(
            "Last face at ({:.0}, {:.0}) {:.0}x{:.0}",
            rect.x(),
            rect.y(),
            rect.width(),
            rect.height()
        );
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => match TrackerConfig::default_path() {
            Some(path) => TrackerConfig::load_or_default(&path)?,
            None => TrackerConfig::default(),
        },
    };

    if let Some(secs) = cli.update_interval {
        config.update_interval_secs = secs;
    }
    if let Some(factor) = cli.reaction_factor {
        config.reaction_factor = factor;
    }
    if let Some(ratio) = cli.reference_width {
        config.reference_width_ratio = ratio;
    }
    if let Some(confidence) = cli.confidence {
        config.detector.confidence = confidence;
    }
    if let Some(model) = &cli.model {
        config.detector.model_path = Some(model.clone());
    }
    if let Some(url) = &cli.model_url {
        config.detector.model_url = Some(url.clone());
    }

    config.validate()?;
    Ok(config)
}

fn build_detector(
    config: &TrackerConfig,
) -> Result<OnnxBlazefaceDetector, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {BLAZEFACE_MODEL_NAME}");
    let resolver = ModelResolver::with_default_cache()?;
    let model_path = resolver.resolve(
        BLAZEFACE_MODEL_NAME,
        config.detector.model_path.as_deref(),
        config.detector.model_url.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    OnnxBlazefaceDetector::new(&model_path, config.detector.confidence)
}

fn open_camera(cli: &Cli) -> Box<dyn CameraSource> {
    #[cfg(all(feature = "v4l", target_os = "linux"))]
    {
        use facetrack_core::camera::infrastructure::v4l_camera::V4lCamera;
        if cli.input.starts_with("/dev/video") {
            return Box::new(V4lCamera::new(cli.input.clone()));
        }
    }
    Box::new(FfmpegCamera::new(cli.input.clone()).with_realtime(cli.realtime))
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if is_image(Path::new(&cli.input)) {
        return Err(format!(
            "Input must be a video or camera, got image file {}",
            cli.input
        )
        .into());
    }
    if cli.capture_every == Some(0) {
        return Err("--capture-every must be at least 1".into());
    }
    if cli.capture_every.is_some() && cli.capture_dir.is_none() {
        return Err("--capture-every requires --capture-dir".into());
    }
    if let Some(path) = &cli.preview {
        if !is_image(path) {
            return Err(format!(
                "Preview must be an image file ({}), got {}",
                IMAGE_EXTENSIONS.join(", "),
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}

/// Counts processed frames for `--max-frames` and `--capture-every`.
struct FrameCounter(Arc<AtomicUsize>);

impl PreviewSink for FrameCounter {
    fn present(
        &mut self,
        _frame: &Frame,
        _face: Option<&FaceRect>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Prints distances to stdout and saves stills when a directory is given.
struct ReportingDelegate {
    capture_dir: Option<PathBuf>,
    writer: ImageFileWriter,
    saved: AtomicUsize,
}

impl ReportingDelegate {
    fn new(capture_dir: Option<PathBuf>) -> Self {
        Self {
            capture_dir,
            writer: ImageFileWriter::new(),
            saved: AtomicUsize::new(0),
        }
    }

    fn saved(&self) -> usize {
        self.saved.load(Ordering::Relaxed)
    }
}

impl FaceTrackerDelegate for ReportingDelegate {
    fn face_tracked(&self, rect: FaceRect, offset_width: f32, offset_height: f32, distance: f32) {
        log::debug!(
            "face {:.0}x{:.0} offset ({offset_width:+.2}, {offset_height:+.2}) distance {distance:.2}",
            rect.width(),
            rect.height()
        );
    }

    fn fluent_update_distance(&self, distance: f32) {
        println!("{distance:.3}");
    }

    fn captured_image(&self, image: Frame) {
        let Some(dir) = &self.capture_dir else {
            return;
        };
        let seq = self.saved.load(Ordering::Relaxed);
        let path = numbered_path(dir, "still", seq, "png");
        match self.writer.write(&path, &image) {
            Ok(()) => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                log::info!("Saved still to {}", path.display());
            }
            Err(e) => log::error!("Failed to save {}: {e}", path.display()),
        }
    }
}
