use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;

/// One face found in a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub rect: FaceRect,
    pub score: f32,
}

impl Detection {
    pub fn new(rect: FaceRect, score: f32) -> Self {
        Self { rect, score }
    }

    /// The detection covering the most area, ties broken by score.
    pub fn largest(detections: &[Detection]) -> Option<&Detection> {
        detections.iter().max_by(|a, b| {
            a.rect
                .area()
                .total_cmp(&b.rect.area())
                .then(a.score.total_cmp(&b.score))
        })
    }
}

/// Face detection capability.
///
/// Implementations may keep state across frames, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}
