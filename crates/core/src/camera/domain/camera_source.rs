use crate::shared::frame::Frame;

/// What a camera reports about itself once opened.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate, 0.0 when the source does not report one.
    pub fps: f64,
}

/// Live video capture capability.
///
/// Implementations own the device or stream handle. The tracker drives a
/// source from its capture thread only, so `&mut self` is enough.
pub trait CameraSource: Send {
    /// Starts streaming and returns the negotiated format.
    fn open(&mut self) -> Result<CameraInfo, Box<dyn std::error::Error>>;

    /// Blocks until the next frame is available. `Ok(None)` means the stream
    /// has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>>;

    /// Takes a still photograph. Sources without a dedicated photo path
    /// return the next video frame.
    fn capture_still(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        self.next_frame()?
            .ok_or_else(|| "camera stream ended before still capture".into())
    }

    /// Releases the device. Safe to call more than once.
    fn close(&mut self);
}
