use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::camera::domain::camera_source::{CameraInfo, CameraSource};
use crate::camera::domain::preview_sink::PreviewSink;
use crate::detection::domain::distance_estimator::DistanceEstimator;
use crate::detection::domain::distance_smoother::DistanceSmoother;
use crate::detection::domain::face_detector::{Detection, FaceDetector};
use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;
use crate::shared::constants::MIN_UPDATE_INTERVAL_SECS;
use crate::tracking::tracker_config::{
    validate_reaction_factor, validate_update_interval, TrackerConfig,
};
use crate::tracking::tracker_delegate::FaceTrackerDelegate;
use crate::tracking::tracker_error::TrackerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    /// Not started, stopped, or the camera stream has ended.
    Idle,
    /// Processing frames and emitting callbacks.
    Running,
    /// Running with at least one still capture not yet delivered.
    CapturePending,
}

/// Bridges a camera source and a face detector to a single delegate.
///
/// Layout while running: `camera → capture thread → tracking thread → delegate`.
/// The capture thread owns the camera and also serves still requests. The
/// tracking thread runs detection, keeps the face rectangle and distance up
/// to date, feeds preview sinks and emits smoothed distance on a timer.
pub struct FaceTracker {
    delegate: Weak<dyn FaceTrackerDelegate>,
    shared: Arc<Mutex<TrackingState>>,
    previews: Arc<Mutex<Vec<Box<dyn PreviewSink>>>>,
    estimator: DistanceEstimator,
    frame_queue_capacity: usize,
    session: Option<Session>,
}

struct TrackingState {
    face_rect: Option<FaceRect>,
    measured_distance: Option<f32>,
    smoother: DistanceSmoother,
    /// Kept as given so the property reads back exactly; converted to a
    /// `Duration` only when the smoothing deadline is armed.
    update_interval_secs: f32,
    pending_captures: usize,
    /// Cleared by the capture thread before its final drain of still
    /// requests. Checked and acted on under the same lock as `capture_image`.
    accepting_captures: bool,
}

struct Session {
    cancelled: Arc<AtomicBool>,
    still_tx: Sender<()>,
    still_rx: Receiver<()>,
    capture_handle: JoinHandle<usize>,
    tracking_handle: JoinHandle<()>,
}

enum CaptureEvent {
    Frame(Frame),
    Still(Result<Frame, String>),
}

impl FaceTracker {
    /// Creates an idle tracker with default settings that reports to `delegate`.
    ///
    /// Only a weak reference is kept. Once the delegate is dropped the tracker
    /// keeps running but its callbacks go nowhere.
    pub fn new<D: FaceTrackerDelegate + 'static>(delegate: &Arc<D>) -> Self {
        Self::build(downgrade(delegate), TrackerConfig::default())
    }

    pub fn with_config<D: FaceTrackerDelegate + 'static>(
        delegate: &Arc<D>,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self::build(downgrade(delegate), config))
    }

    fn build(delegate: Weak<dyn FaceTrackerDelegate>, config: TrackerConfig) -> Self {
        let state = TrackingState {
            face_rect: None,
            measured_distance: None,
            smoother: DistanceSmoother::new(config.reaction_factor),
            update_interval_secs: config.update_interval_secs,
            pending_captures: 0,
            accepting_captures: false,
        };
        Self {
            delegate,
            shared: Arc::new(Mutex::new(state)),
            previews: Arc::new(Mutex::new(Vec::new())),
            estimator: DistanceEstimator::new(config.reference_width_ratio),
            frame_queue_capacity: config.frame_queue_capacity,
            session: None,
        }
    }

    pub fn delegate(&self) -> Option<Arc<dyn FaceTrackerDelegate>> {
        self.delegate.upgrade()
    }

    /// Sets how often the smoothed distance is recomputed and how strongly
    /// each update reacts to the latest measurement.
    pub fn fluid_update_interval(
        &self,
        interval_secs: f32,
        reaction_factor: f32,
    ) -> Result<(), TrackerError> {
        validate_update_interval(interval_secs)?;
        validate_reaction_factor(reaction_factor)?;
        let mut state = lock(&self.shared);
        state.update_interval_secs = interval_secs;
        state.smoother.set_reaction_factor(reaction_factor);
        Ok(())
    }

    pub fn update_interval(&self) -> f32 {
        lock(&self.shared).update_interval_secs
    }

    pub fn set_update_interval(&self, interval_secs: f32) -> Result<(), TrackerError> {
        validate_update_interval(interval_secs)?;
        lock(&self.shared).update_interval_secs = interval_secs;
        Ok(())
    }

    pub fn reaction_factor(&self) -> f32 {
        lock(&self.shared).smoother.reaction_factor()
    }

    pub fn set_reaction_factor(&self, reaction_factor: f32) -> Result<(), TrackerError> {
        validate_reaction_factor(reaction_factor)?;
        lock(&self.shared)
            .smoother
            .set_reaction_factor(reaction_factor);
        Ok(())
    }

    /// Most recently detected face, `None` until the first detection.
    pub fn face_rect(&self) -> Option<FaceRect> {
        lock(&self.shared).face_rect
    }

    /// Overrides the stored face rectangle; the next detection replaces it.
    pub fn set_face_rect(&self, rect: FaceRect) {
        lock(&self.shared).face_rect = Some(rect);
    }

    /// Last smoothed distance, `None` before the first smoothing tick.
    pub fn smoothed_distance(&self) -> Option<f32> {
        lock(&self.shared).smoother.previous()
    }

    /// Attaches a preview surface. Sinks may be added before or while running.
    pub fn add_preview(&self, sink: Box<dyn PreviewSink>) {
        lock(&self.previews).push(sink);
    }

    pub fn state(&self) -> TrackerState {
        match &self.session {
            Some(session) if !session.tracking_handle.is_finished() => {
                if lock(&self.shared).pending_captures > 0 {
                    TrackerState::CapturePending
                } else {
                    TrackerState::Running
                }
            }
            _ => TrackerState::Idle,
        }
    }

    /// Opens the camera and starts processing frames in the background.
    pub fn start(
        &mut self,
        mut camera: Box<dyn CameraSource>,
        detector: Box<dyn FaceDetector>,
    ) -> Result<CameraInfo, TrackerError> {
        if self.state() != TrackerState::Idle {
            return Err(TrackerError::AlreadyRunning);
        }
        // A session whose stream ended on its own still needs joining.
        self.stop()?;

        let info = camera
            .open()
            .map_err(|e| TrackerError::Camera(e.to_string()))?;
        log::info!(
            "Tracking {} ({}x{} @ {:.1} fps)",
            info.name,
            info.width,
            info.height,
            info.fps
        );

        {
            let mut state = lock(&self.shared);
            state.face_rect = None;
            state.measured_distance = None;
            state.smoother.reset();
            state.pending_captures = 0;
            state.accepting_captures = true;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = crossbeam_channel::bounded(self.frame_queue_capacity);
        let (still_tx, still_rx) = crossbeam_channel::unbounded();

        let capture_handle = spawn_capture(
            camera,
            event_tx,
            still_rx.clone(),
            self.shared.clone(),
            cancelled.clone(),
        );
        let tracking_handle = spawn_tracking(
            TrackingLoop {
                detector,
                delegate: self.delegate.clone(),
                shared: self.shared.clone(),
                previews: self.previews.clone(),
                estimator: self.estimator,
                cancelled: cancelled.clone(),
            },
            event_rx,
        );

        self.session = Some(Session {
            cancelled,
            still_tx,
            still_rx,
            capture_handle,
            tracking_handle,
        });
        Ok(info)
    }

    /// Requests one still photograph.
    ///
    /// On `Ok`, exactly one of `captured_image` or `capture_failed` follows on
    /// the delegate. On `Err`, neither does. When the stream ends on its own,
    /// every accepted request is answered before `state()` reports `Idle`.
    pub fn capture_image(&self) -> Result<(), TrackerError> {
        let Some(session) = &self.session else {
            return Err(TrackerError::NotRunning);
        };
        // Sending under the lock orders this request against the capture
        // thread's final drain: it is either drained there or refused here.
        let mut state = lock(&self.shared);
        if !state.accepting_captures || session.still_tx.send(()).is_err() {
            return Err(TrackerError::NotRunning);
        }
        state.pending_captures += 1;
        Ok(())
    }

    /// Stops both background threads and closes the camera.
    ///
    /// Still requests that were never served are reported through
    /// `capture_failed`. Calling `stop` on an idle tracker is a no-op.
    pub fn stop(&mut self) -> Result<(), TrackerError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session.cancelled.store(true, Ordering::Relaxed);

        let mut first_error = None;
        let lost = match session.capture_handle.join() {
            Ok(lost) => lost,
            Err(_) => {
                first_error.get_or_insert(TrackerError::ThreadPanicked("capture"));
                0
            }
        };
        if session.tracking_handle.join().is_err() {
            first_error.get_or_insert(TrackerError::ThreadPanicked("tracking"));
        }

        let unserved = lost + session.still_rx.try_iter().count();
        {
            let mut state = lock(&self.shared);
            state.pending_captures = 0;
            state.accepting_captures = false;
        }
        if unserved > 0 {
            log::debug!("{unserved} still request(s) unanswered at stop");
            if let Some(delegate) = self.delegate.upgrade() {
                for _ in 0..unserved {
                    delegate.capture_failed(&TrackerError::NotRunning);
                }
            }
        }

        log::info!("Tracking stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for FaceTracker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Error while stopping tracker: {e}");
        }
    }
}

fn downgrade<D: FaceTrackerDelegate + 'static>(delegate: &Arc<D>) -> Weak<dyn FaceTrackerDelegate> {
    let weak: Weak<D> = Arc::downgrade(delegate);
    weak
}

/// Validated intervals are at least `MIN_UPDATE_INTERVAL_SECS`; the floor
/// here keeps the deadline from ever being armed in the past.
fn tick_interval(secs: f32) -> Duration {
    Duration::from_secs_f32(secs.max(MIN_UPDATE_INTERVAL_SECS))
}

/// Locks shared state, recovering the data if a delegate callback panicked
/// while another thread held the lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs until the stream ends or the tracker is cancelled. Returns the number
/// of still requests it took but could not hand to the tracking thread.
fn spawn_capture(
    mut camera: Box<dyn CameraSource>,
    event_tx: Sender<CaptureEvent>,
    still_rx: Receiver<()>,
    shared: Arc<Mutex<TrackingState>>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut dropped: usize = 0;
        let mut lost: usize = 0;
        'capture: while !cancelled.load(Ordering::Relaxed) {
            for () in still_rx.try_iter() {
                let still = camera.capture_still().map_err(|e| e.to_string());
                if event_tx.send(CaptureEvent::Still(still)).is_err() {
                    lost += 1;
                    break 'capture;
                }
            }

            match camera.next_frame() {
                Ok(Some(frame)) => match event_tx.try_send(CaptureEvent::Frame(frame)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        log::trace!("Tracking busy, dropped frame ({dropped} total)");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                },
                Ok(None) => {
                    log::info!("Camera stream ended");
                    break;
                }
                Err(e) => {
                    log::error!("Camera read failed: {e}");
                    break;
                }
            }
        }

        // On a natural end, requests that raced the end of the stream are
        // answered here. On cancel they stay queued for `stop` to fail.
        if !cancelled.load(Ordering::Relaxed) {
            lock(&shared).accepting_captures = false;
            for () in still_rx.try_iter() {
                let ended = Err("camera stream ended".to_string());
                if event_tx.send(CaptureEvent::Still(ended)).is_err() {
                    lost += 1;
                }
            }
        }

        if dropped > 0 {
            log::debug!("Dropped {dropped} late frame(s)");
        }
        camera.close();
        lost
    })
}

struct TrackingLoop {
    detector: Box<dyn FaceDetector>,
    delegate: Weak<dyn FaceTrackerDelegate>,
    shared: Arc<Mutex<TrackingState>>,
    previews: Arc<Mutex<Vec<Box<dyn PreviewSink>>>>,
    estimator: DistanceEstimator,
    cancelled: Arc<AtomicBool>,
}

/// Runs until the capture thread hangs up, so every still it sends is
/// delivered. Frames and ticks are ignored once cancelled.
fn spawn_tracking(mut tracking: TrackingLoop, event_rx: Receiver<CaptureEvent>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut armed_secs = lock(&tracking.shared).update_interval_secs;
        let mut last_tick = Instant::now();
        let mut deadline = crossbeam_channel::at(last_tick + tick_interval(armed_secs));

        loop {
            let cancelled = tracking.cancelled.load(Ordering::Relaxed);
            crossbeam_channel::select! {
                recv(event_rx) -> event => match event {
                    Ok(CaptureEvent::Frame(frame)) if !cancelled => tracking.process_frame(frame),
                    Ok(CaptureEvent::Frame(_)) => {}
                    Ok(CaptureEvent::Still(result)) => tracking.deliver_still(result),
                    Err(_) => break,
                },
                recv(deadline) -> _ => {
                    if !cancelled {
                        tracking.fluent_tick();
                    }
                    last_tick = Instant::now();
                    armed_secs = lock(&tracking.shared).update_interval_secs;
                    deadline = crossbeam_channel::at(last_tick + tick_interval(armed_secs));
                },
            }

            let secs = lock(&tracking.shared).update_interval_secs;
            if secs != armed_secs {
                armed_secs = secs;
                deadline = crossbeam_channel::at(last_tick + tick_interval(armed_secs));
            }
        }
    })
}

impl TrackingLoop {
    fn process_frame(&mut self, frame: Frame) {
        let (fw, fh) = (frame.width(), frame.height());
        let detections = match self.detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Detection failed on frame {}: {e}", frame.index());
                Vec::new()
            }
        };

        let tracked = Detection::largest(&detections)
            .map(|d| d.rect.clamp_to(fw, fh))
            .filter(|r| !r.is_empty());

        if let Some(rect) = tracked {
            let (offset_w, offset_h) = rect.center_offset(fw, fh);
            let distance = self.estimator.estimate(&rect, fw);
            {
                let mut state = lock(&self.shared);
                state.face_rect = Some(rect);
                if distance.is_some() {
                    state.measured_distance = distance;
                }
            }
            log::debug!(
                "frame {}: face at ({:.0}, {:.0}) {:.0}x{:.0}, distance {distance:?}",
                frame.index(),
                rect.x(),
                rect.y(),
                rect.width(),
                rect.height()
            );
            if let (Some(distance), Some(delegate)) = (distance, self.delegate.upgrade()) {
                delegate.face_tracked(rect, offset_w, offset_h, distance);
            }
        }

        for sink in lock(&self.previews).iter_mut() {
            if let Err(e) = sink.present(&frame, tracked.as_ref()) {
                log::warn!("Preview failed: {e}");
            }
        }
    }

    fn deliver_still(&mut self, result: Result<Frame, String>) {
        {
            let mut state = lock(&self.shared);
            state.pending_captures = state.pending_captures.saturating_sub(1);
        }
        let Some(delegate) = self.delegate.upgrade() else {
            return;
        };
        match result {
            Ok(image) => {
                log::debug!("Still captured ({}x{})", image.width(), image.height());
                delegate.captured_image(image);
            }
            Err(e) => delegate.capture_failed(&TrackerError::Camera(e)),
        }
    }

    fn fluent_tick(&mut self) {
        let smoothed = {
            let mut state = lock(&self.shared);
            match state.measured_distance {
                Some(measured) => Some(state.smoother.smooth(measured)),
                None => None,
            }
        };
        if let (Some(distance), Some(delegate)) = (smoothed, self.delegate.upgrade()) {
            delegate.fluent_update_distance(distance);
        }
    }
}
