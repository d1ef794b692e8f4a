use std::path::Path;

use crate::camera::domain::image_writer::ImageWriter;
use crate::shared::frame::Frame;

/// Encodes frames with the `image` crate; PNG, JPEG and the other formats it
/// knows are picked from the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileWriter;

impl ImageFileWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ImageWriter for ImageFileWriter {
    fn write(&self, path: &Path, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let img = frame
            .to_rgb_image()
            .ok_or("frame buffer does not match its dimensions")?;
        img.save(path)?;
        Ok(())
    }
}
