use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;
use crate::tracking::tracker_error::TrackerError;

/// Listener for tracking and capture events.
///
/// The tracker holds only a weak reference, so the delegate's owner decides
/// its lifetime. All callbacks run on the tracker's background thread;
/// implementations must hand results over to their own thread or context
/// before touching UI state.
pub trait FaceTrackerDelegate: Send + Sync {
    /// A face was found in the current frame.
    ///
    /// `offset_width` and `offset_height` give the face center relative to
    /// the frame center in `[-1, 1]`; `distance` is the unsmoothed estimate.
    fn face_tracked(&self, rect: FaceRect, offset_width: f32, offset_height: f32, distance: f32);

    /// Smoothed distance, emitted once per update interval.
    fn fluent_update_distance(&self, distance: f32);

    /// Result of one `capture_image` request.
    fn captured_image(&self, image: Frame);

    /// A `capture_image` request that could not be fulfilled.
    fn capture_failed(&self, error: &TrackerError) {
        log::warn!("Still capture failed: {error}");
    }
}
