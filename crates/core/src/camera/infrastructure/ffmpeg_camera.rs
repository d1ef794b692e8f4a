use std::time::{Duration, Instant};

use crate::camera::domain::camera_source::{CameraInfo, CameraSource};
use crate::shared::frame::Frame;

/// Camera source backed by ffmpeg-next (libavformat + libavcodec).
///
/// Accepts anything libavformat can open: a recorded video file, an RTSP or
/// HTTP stream. Decoded frames are converted to RGB24. With `realtime`
/// enabled, frames are released no faster than the stream's frame rate so a
/// file behaves like a live camera.
pub struct FfmpegCamera {
    source: String,
    realtime: bool,
    session: Option<DecodeSession>,
}

struct DecodeSession {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    last_emit: Option<Instant>,
    next_index: usize,
    flushing: bool,
    done: bool,
}

// Safety: the camera is owned and driven by a single capture thread; the raw
// ffmpeg pointers inside are never shared.
unsafe impl Send for FfmpegCamera {}

impl FfmpegCamera {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            realtime: false,
            session: None,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl CameraSource for FfmpegCamera {
    fn open(&mut self) -> Result<CameraInfo, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let ictx = ffmpeg_next::format::input(&self.source)?;
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("no video stream found")?;

        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        drop(stream);

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        let frame_interval =
            (self.realtime && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));

        log::info!("Opened {} ({width}x{height} @ {fps:.1} fps)", self.source);
        self.session = Some(DecodeSession {
            ictx,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            frame_interval,
            last_emit: None,
            next_index: 0,
            flushing: false,
            done: false,
        });

        Ok(CameraInfo {
            name: self.source.clone(),
            width,
            height,
            fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let session = self.session.as_mut().ok_or("FfmpegCamera: not opened")?;
        let frame = session.decode_next()?;
        if frame.is_some() {
            session.pace();
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            log::debug!("Closed {}", self.source);
        }
    }
}

impl DecodeSession {
    fn decode_next(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        if self.done {
            return Ok(None);
        }
        if let Some(frame) = self.try_receive()? {
            return Ok(Some(frame));
        }
        if self.flushing {
            self.done = true;
            return Ok(None);
        }

        loop {
            let next = self
                .ictx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                let frame = self.try_receive()?;
                if frame.is_none() {
                    self.done = true;
                }
                return Ok(frame);
            };

            if index != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Skipping undecodable packet: {e}");
                continue;
            }
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut rgb)?;

        let pixels = packed_rgb(rgb.data(0), rgb.stride(0), self.width, self.height);
        let frame = Frame::new(pixels, self.width, self.height, self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

/// Copies RGB24 rows out of a strided ffmpeg plane into a packed buffer.
fn packed_rgb(plane: &[u8], stride: usize, width: u32, height: u32) -> Vec<u8> {
    let row_bytes = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&plane[start..start + row_bytes]);
    }
    pixels
}
