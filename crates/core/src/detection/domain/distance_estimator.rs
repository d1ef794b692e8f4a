use crate::shared::constants::DEFAULT_REFERENCE_WIDTH_RATIO;
use crate::shared::face_rect::FaceRect;

/// Relative camera-to-face distance from apparent face width.
///
/// Pinhole model: apparent size is inversely proportional to distance. A
/// face spanning `reference_width_ratio` of the frame width is at 1.0, half
/// that width is at 2.0, and so on. Units are relative, not metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceEstimator {
    reference_width_ratio: f32,
}

impl DistanceEstimator {
    pub fn new(reference_width_ratio: f32) -> Self {
        Self {
            reference_width_ratio,
        }
    }

    pub fn reference_width_ratio(&self) -> f32 {
        self.reference_width_ratio
    }

    /// `None` when the face or the frame has no width.
    pub fn estimate(&self, face: &FaceRect, frame_width: u32) -> Option<f32> {
        if frame_width == 0 || face.width() <= 0.0 {
            return None;
        }
        let ratio = face.width() / frame_width as f32;
        Some(self.reference_width_ratio / ratio)
    }
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_WIDTH_RATIO)
    }
}
