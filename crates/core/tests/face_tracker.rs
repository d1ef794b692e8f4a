use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;

use facetrack_core::camera::domain::camera_source::{CameraInfo, CameraSource};
use facetrack_core::camera::domain::preview_sink::PreviewSink;
use facetrack_core::detection::domain::face_detector::{Detection, FaceDetector};
use facetrack_core::shared::constants::MIN_UPDATE_INTERVAL_SECS;
use facetrack_core::shared::face_rect::FaceRect;
use facetrack_core::shared::frame::Frame;
use facetrack_core::tracking::face_tracker::{FaceTracker, TrackerState};
use facetrack_core::tracking::tracker_config::TrackerConfig;
use facetrack_core::tracking::tracker_delegate::FaceTrackerDelegate;
use facetrack_core::tracking::tracker_error::TrackerError;

const FRAME_W: u32 = 200;
const FRAME_H: u32 = 100;
const WAIT: Duration = Duration::from_secs(5);

/// Blank frames at roughly 500 fps, optionally ending after `limit` frames.
struct FakeCamera {
    limit: Option<usize>,
    produced: usize,
    fail_open: bool,
}

impl FakeCamera {
    fn endless() -> Self {
        Self {
            limit: None,
            produced: 0,
            fail_open: false,
        }
    }

    fn with_frames(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::endless()
        }
    }

    fn broken() -> Self {
        Self {
            fail_open: true,
            ..Self::endless()
        }
    }
}

impl CameraSource for FakeCamera {
    fn open(&mut self) -> Result<CameraInfo, Box<dyn std::error::Error>> {
        if self.fail_open {
            return Err("no such device".into());
        }
        Ok(CameraInfo {
            name: "fake".to_string(),
            width: FRAME_W,
            height: FRAME_H,
            fps: 500.0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(2));
        let data = vec![0u8; (FRAME_W * FRAME_H * 3) as usize];
        let frame = Frame::new(data, FRAME_W, FRAME_H, self.produced);
        self.produced += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {}
}

/// Reports the same faces on every frame, or an error when `faces` is `None`.
struct FakeDetector {
    faces: Option<Vec<Detection>>,
}

impl FakeDetector {
    fn one_face(rect: FaceRect) -> Self {
        Self {
            faces: Some(vec![Detection::new(rect, 0.9)]),
        }
    }

    fn nobody() -> Self {
        Self {
            faces: Some(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self { faces: None }
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        self.faces.clone().ok_or_else(|| "model exploded".into())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Tracked {
        rect: FaceRect,
        offset_width: f32,
        offset_height: f32,
        distance: f32,
    },
    Fluent(f32),
    Captured(u32, u32),
    Failed(TrackerError),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl FaceTrackerDelegate for Recorder {
    fn face_tracked(&self, rect: FaceRect, offset_width: f32, offset_height: f32, distance: f32) {
        self.push(Event::Tracked {
            rect,
            offset_width,
            offset_height,
            distance,
        });
    }

    fn fluent_update_distance(&self, distance: f32) {
        self.push(Event::Fluent(distance));
    }

    fn captured_image(&self, image: Frame) {
        self.push(Event::Captured(image.width(), image.height()));
    }

    fn capture_failed(&self, error: &TrackerError) {
        self.push(Event::Failed(error.clone()));
    }
}

struct RecordingPreview {
    seen: Arc<Mutex<Vec<Option<FaceRect>>>>,
}

impl PreviewSink for RecordingPreview {
    fn present(
        &mut self,
        _frame: &Frame,
        face: Option<&FaceRect>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.seen.lock().unwrap().push(face.copied());
        Ok(())
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn is_tracked(e: &Event) -> bool {
    matches!(e, Event::Tracked { .. })
}

fn is_fluent(e: &Event) -> bool {
    matches!(e, Event::Fluent(_))
}

fn is_capture_outcome(e: &Event) -> bool {
    matches!(e, Event::Captured(..) | Event::Failed(_))
}

/// Upper-left quarter of the frame: center (75, 25), a quarter of the width.
fn upper_left_face() -> FaceRect {
    FaceRect::new(50.0, 0.0, 50.0, 50.0)
}

#[test]
fn test_reports_tracked_face_geometry() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    let info = tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert_eq!((info.width, info.height), (FRAME_W, FRAME_H));

    assert!(wait_until(|| recorder.count(is_tracked) >= 3));
    tracker.stop().unwrap();

    let Some(Event::Tracked {
        rect,
        offset_width,
        offset_height,
        distance,
    }) = recorder.events().into_iter().find(is_tracked)
    else {
        panic!("no face_tracked event");
    };
    assert_eq!(rect, upper_left_face());
    assert_relative_eq!(offset_width, -0.25);
    assert_relative_eq!(offset_height, -0.5);
    assert_relative_eq!(distance, 1.0);
    assert_eq!(tracker.face_rect(), Some(upper_left_face()));
}

#[test]
fn test_tracked_rect_is_clamped_to_the_frame() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    let oversized = FaceRect::new(-40.0, -40.0, 400.0, 400.0);

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(oversized)),
        )
        .unwrap();
    assert!(wait_until(|| recorder.count(is_tracked) >= 1));
    tracker.stop().unwrap();

    for event in recorder.events() {
        if let Event::Tracked { rect, .. } = event {
            assert!(rect.width() >= 0.0 && rect.height() >= 0.0);
            assert!(rect.x() + rect.width() <= FRAME_W as f32);
            assert!(rect.y() + rect.height() <= FRAME_H as f32);
        }
    }
}

#[test]
fn test_fluent_updates_follow_the_interval() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    tracker.fluid_update_interval(0.01, 0.5).unwrap();

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert!(wait_until(|| recorder.count(is_fluent) >= 3));
    tracker.stop().unwrap();

    // Constant measurement: the first tick adopts it and blending keeps it.
    for event in recorder.events() {
        if let Event::Fluent(distance) = event {
            assert_relative_eq!(distance, 1.0, epsilon = 1e-5);
        }
    }
    assert_relative_eq!(tracker.smoothed_distance().unwrap(), 1.0, epsilon = 1e-5);
}

#[test]
fn test_shortest_interval_does_not_flood_the_delegate() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    assert!(tracker.fluid_update_interval(1e-10, 0.5).is_err());
    tracker
        .fluid_update_interval(MIN_UPDATE_INTERVAL_SECS, 0.5)
        .unwrap();

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert!(wait_until(|| recorder.count(is_tracked) >= 1));
    let window = Instant::now();
    let fluent_before = recorder.count(is_fluent);
    let tracked_before = recorder.count(is_tracked);
    thread::sleep(Duration::from_millis(300));
    let ticks = recorder.count(is_fluent) - fluent_before;
    let tracked = recorder.count(is_tracked) - tracked_before;
    let elapsed = window.elapsed();
    tracker.stop().unwrap();

    // One tick per millisecond at most, plus slack for the re-arm.
    assert!(ticks as u128 <= elapsed.as_millis() + 5, "{ticks} ticks in {elapsed:?}");
    assert!(tracked > 0, "frame processing starved");
}

#[test]
fn test_no_face_means_no_callbacks() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    tracker.fluid_update_interval(0.01, 0.5).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    tracker.add_preview(Box::new(RecordingPreview { seen: seen.clone() }));

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() >= 5));
    thread::sleep(Duration::from_millis(30));
    tracker.stop().unwrap();

    assert!(recorder.events().is_empty());
    assert_eq!(tracker.face_rect(), None);
    assert!(seen.lock().unwrap().iter().all(Option::is_none));
}

#[test]
fn test_detector_errors_skip_the_frame() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    let seen = Arc::new(Mutex::new(Vec::new()));
    tracker.add_preview(Box::new(RecordingPreview { seen: seen.clone() }));

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::failing()),
        )
        .unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() >= 3));
    assert_ne!(tracker.state(), TrackerState::Idle);
    tracker.stop().unwrap();

    assert_eq!(recorder.count(is_tracked), 0);
}

#[test]
fn test_preview_receives_frames_with_the_face() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    let seen = Arc::new(Mutex::new(Vec::new()));
    tracker.add_preview(Box::new(RecordingPreview { seen: seen.clone() }));

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() >= 3));
    tracker.stop().unwrap();

    assert!(seen
        .lock()
        .unwrap()
        .iter()
        .all(|face| *face == Some(upper_left_face())));
}

#[test]
fn test_each_capture_request_gets_one_image() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    for _ in 0..3 {
        tracker.capture_image().unwrap();
    }
    assert!(wait_until(|| recorder.count(is_capture_outcome) >= 3));
    assert!(wait_until(|| tracker.state() == TrackerState::Running));
    tracker.stop().unwrap();

    let captured: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(is_capture_outcome)
        .collect();
    assert_eq!(captured, vec![Event::Captured(FRAME_W, FRAME_H); 3]);
}

#[test]
fn test_capture_then_immediate_stop_still_answers_once() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    tracker.capture_image().unwrap();
    tracker.capture_image().unwrap();
    tracker.stop().unwrap();

    assert_eq!(recorder.count(is_capture_outcome), 2);
    for event in recorder.events().into_iter().filter(is_capture_outcome) {
        assert!(matches!(
            event,
            Event::Captured(FRAME_W, FRAME_H) | Event::Failed(TrackerError::NotRunning)
        ));
    }
}

#[test]
fn test_stream_end_returns_to_idle() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::with_frames(3)),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert!(wait_until(|| tracker.state() == TrackerState::Idle));

    assert_eq!(tracker.capture_image(), Err(TrackerError::NotRunning));
    tracker.stop().unwrap();
    tracker.stop().unwrap();
}

#[test]
fn test_requests_racing_stream_end_are_answered_before_idle() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::with_frames(5)),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    let mut accepted = 0;
    while accepted < 10_000 && tracker.capture_image().is_ok() {
        accepted += 1;
    }
    assert!(wait_until(|| tracker.state() == TrackerState::Idle));

    // Nothing is left for stop() to answer.
    assert_eq!(recorder.count(is_capture_outcome), accepted);
    tracker.stop().unwrap();
    assert_eq!(recorder.count(is_capture_outcome), accepted);
}

#[test]
fn test_restart_after_stream_end() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::with_frames(2)),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    assert!(wait_until(|| tracker.state() == TrackerState::Idle));

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    assert_eq!(tracker.state(), TrackerState::Running);
    tracker.stop().unwrap();
    assert_eq!(tracker.state(), TrackerState::Idle);
}

#[test]
fn test_start_twice_is_rejected() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::nobody()),
        )
        .unwrap();
    let second = tracker.start(
        Box::new(FakeCamera::endless()),
        Box::new(FakeDetector::nobody()),
    );
    assert_eq!(second, Err(TrackerError::AlreadyRunning));
    tracker.stop().unwrap();
}

#[test]
fn test_camera_open_failure_leaves_tracker_idle() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);

    let result = tracker.start(
        Box::new(FakeCamera::broken()),
        Box::new(FakeDetector::nobody()),
    );
    assert!(matches!(result, Err(TrackerError::Camera(_))));
    assert_eq!(tracker.state(), TrackerState::Idle);
}

#[test]
fn test_dropped_delegate_does_not_stop_tracking() {
    let recorder = Arc::new(Recorder::default());
    let mut tracker = FaceTracker::new(&recorder);
    let seen = Arc::new(Mutex::new(Vec::new()));
    tracker.add_preview(Box::new(RecordingPreview { seen: seen.clone() }));

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    drop(recorder);
    assert!(tracker.delegate().is_none());

    let before = seen.lock().unwrap().len();
    assert!(wait_until(|| seen.lock().unwrap().len() > before + 2));
    tracker.capture_image().unwrap();
    tracker.stop().unwrap();
}

#[test]
fn test_settings_change_while_running() {
    let recorder = Arc::new(Recorder::default());
    let config = TrackerConfig {
        update_interval_secs: 10.0,
        ..TrackerConfig::default()
    };
    let mut tracker = FaceTracker::with_config(&recorder, config).unwrap();

    tracker
        .start(
            Box::new(FakeCamera::endless()),
            Box::new(FakeDetector::one_face(upper_left_face())),
        )
        .unwrap();
    assert!(wait_until(|| recorder.count(is_tracked) >= 1));
    assert_eq!(recorder.count(is_fluent), 0);

    tracker.set_update_interval(0.01).unwrap();
    assert!(wait_until(|| recorder.count(is_fluent) >= 2));
    tracker.stop().unwrap();
}
