use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;

/// A surface that shows the live camera feed.
///
/// Called from the tracking thread for every processed frame, together with
/// the face found in that frame, if any.
pub trait PreviewSink: Send {
    fn present(
        &mut self,
        frame: &Frame,
        face: Option<&FaceRect>,
    ) -> Result<(), Box<dyn std::error::Error>>;
}
