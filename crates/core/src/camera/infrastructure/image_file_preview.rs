use std::path::PathBuf;

use crate::camera::domain::image_writer::ImageWriter;
use crate::camera::domain::preview_sink::PreviewSink;
use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;

const OUTLINE_COLOR: [u8; 3] = [0, 255, 0];
const OUTLINE_THICKNESS: u32 = 2;

/// Preview surface that keeps an image file up to date with the live feed.
///
/// Every `every_n`-th frame is written to `path` with the tracked face
/// outlined, so any image viewer that reloads the file acts as a monitor.
pub struct ImageFilePreview {
    path: PathBuf,
    every_n: usize,
    writer: Box<dyn ImageWriter>,
    presented: usize,
}

impl ImageFilePreview {
    pub fn new(path: impl Into<PathBuf>, every_n: usize, writer: Box<dyn ImageWriter>) -> Self {
        Self {
            path: path.into(),
            every_n: every_n.max(1),
            writer,
            presented: 0,
        }
    }

    pub fn frames_presented(&self) -> usize {
        self.presented
    }
}

impl PreviewSink for ImageFilePreview {
    fn present(
        &mut self,
        frame: &Frame,
        face: Option<&FaceRect>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let due = self.presented % self.every_n == 0;
        self.presented += 1;
        if !due {
            return Ok(());
        }

        match face {
            Some(rect) => {
                let mut annotated = frame.clone();
                draw_outline(&mut annotated, rect, OUTLINE_COLOR, OUTLINE_THICKNESS);
                self.writer.write(&self.path, &annotated)
            }
            None => self.writer.write(&self.path, frame),
        }
    }
}

/// Draws a rectangle border of the given thickness, clipped to the frame.
pub fn draw_outline(frame: &mut Frame, rect: &FaceRect, color: [u8; 3], thickness: u32) {
    let clipped = rect.clamp_to(frame.width(), frame.height());
    if clipped.is_empty() {
        return;
    }

    let x1 = clipped.x() as usize;
    let y1 = clipped.y() as usize;
    let x2 = ((clipped.x() + clipped.width()) as usize).min(frame.width() as usize);
    let y2 = ((clipped.y() + clipped.height()) as usize).min(frame.height() as usize);
    let t = thickness as usize;

    let mut pixels = frame.as_ndarray_mut();
    for y in y1..y2 {
        for x in x1..x2 {
            let on_border = y < y1 + t || y + t >= y2 || x < x1 + t || x + t >= x2;
            if on_border {
                for (c, &v) in color.iter().enumerate() {
                    pixels[[y, x, c]] = v;
                }
            }
        }
    }
}
