use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::camera::domain::camera_source::{CameraInfo, CameraSource};
use crate::shared::frame::Frame;

const BUFFER_COUNT: u32 = 4;

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// Webcam capture through Video4Linux2 memory-mapped streaming.
///
/// Asks the driver for RGB3 first and falls back to YUYV; both, plus GREY,
/// are converted to RGB on the capture thread.
pub struct V4lCamera {
    path: String,
    stream: Option<Stream<'static>>,
    width: u32,
    height: u32,
    fourcc: FourCC,
    next_index: usize,
}

// Safety: the mapped buffers are only touched by the capture thread that owns
// the camera.
unsafe impl Send for V4lCamera {}

impl V4lCamera {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            width: 0,
            height: 0,
            fourcc: FourCC::new(RGB3),
            next_index: 0,
        }
    }
}

impl CameraSource for V4lCamera {
    fn open(&mut self) -> Result<CameraInfo, Box<dyn std::error::Error>> {
        let dev = Device::with_path(&self.path)?;
        let name = dev
            .query_caps()
            .map(|caps| caps.card)
            .unwrap_or_else(|_| self.path.clone());

        let mut fmt = dev.format()?;
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(RGB3));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(RGB3) {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(YUYV));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }

        let fps = dev
            .params()
            .map(|p| {
                let interval = p.interval;
                if interval.numerator == 0 {
                    0.0
                } else {
                    interval.denominator as f64 / interval.numerator as f64
                }
            })
            .unwrap_or(0.0);

        self.stream = Some(Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)?);
        self.width = fmt.width;
        self.height = fmt.height;
        self.fourcc = fmt.fourcc;
        self.next_index = 0;

        log::info!(
            "Opened {} ({}x{} {:?})",
            self.path,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(CameraInfo {
            name,
            width: fmt.width,
            height: fmt.height,
            fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let stream = self.stream.as_mut().ok_or("V4lCamera: not opened")?;
        let (data, meta) = stream.next()?;
        log::trace!("v4l buffer seq={} len={}", meta.sequence, data.len());

        let pixels = to_rgb(self.fourcc, self.width, self.height, data)?;
        let frame = Frame::new(pixels, self.width, self.height, self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Closed {}", self.path);
        }
    }
}

fn to_rgb(
    fourcc: FourCC,
    width: u32,
    height: u32,
    data: &[u8],
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let pixels = width as usize * height as usize;
    let mut rgb = if fourcc == FourCC::new(RGB3) {
        data.to_vec()
    } else if fourcc == FourCC::new(YUYV) {
        yuyv_to_rgb(pixels, data)?
    } else if fourcc == FourCC::new(GREY) {
        grey_to_rgb(pixels, data)?
    } else {
        return Err(format!("unsupported pixel format {fourcc:?}").into());
    };

    let expected = pixels * 3;
    if rgb.len() < expected {
        return Err(format!("short buffer: got {}, expected {expected}", rgb.len()).into());
    }
    rgb.truncate(expected);
    Ok(rgb)
}

fn yuyv_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if data.len() < pixels * 2 {
        return Err("short YUYV buffer".into());
    }
    let mut out = Vec::with_capacity(pixels * 3);
    let macropixels = data[..pixels * 2].chunks_exact(4);
    // An odd pixel count leaves a lone `Y U` pair; its V is missing, so treat
    // it as neutral.
    let tail = macropixels.remainder();
    for chunk in macropixels {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        push_yuv(&mut out, chunk[0] as f32, u, v);
        push_yuv(&mut out, chunk[2] as f32, u, v);
    }
    if let &[y, u] = tail {
        push_yuv(&mut out, y as f32, u as f32 - 128.0, 0.0);
    }
    Ok(out)
}

fn push_yuv(out: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    out.push(to_u8(y + 1.402 * v));
    out.push(to_u8(y - 0.344_136 * u - 0.714_136 * v));
    out.push(to_u8(y + 1.772 * u));
}

fn grey_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if data.len() < pixels {
        return Err("short GREY buffer".into());
    }
    Ok(data[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
