//! BlazeFace short-range face detector running on ONNX Runtime via `ort`.
//!
//! Produces bounding boxes only; landmarks in the regressor output are
//! ignored because the tracker reports position, size and distance.

use std::path::Path;

use crate::detection::domain::face_detector::{Detection, FaceDetector};
use crate::shared::face_rect::FaceRect;
use crate::shared::frame::Frame;

/// Model input resolution.
const INPUT_SIZE: u32 = 128;

pub const DEFAULT_CONFIDENCE: f32 = 0.5;

const NMS_IOU_THRESH: f32 = 0.3;

/// Anchors of the short-range model: 16x16 grid x 2 + 8x8 grid x 6.
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor tensor: box (4) + 6 keypoints (12).
const REGRESSOR_STRIDE: usize = 16;

pub struct OnnxBlazefaceDetector {
    session: ort::session::Session,
    confidence: f32,
    anchors: Vec<[f32; 2]>,
}

impl OnnxBlazefaceDetector {
    pub fn new(model_path: &Path, confidence: f32) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;
        log::info!("Loaded BlazeFace model from {}", model_path.display());
        Ok(Self {
            session,
            confidence,
            anchors: generate_anchors(),
        })
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

impl FaceDetector for OnnxBlazefaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let input = ort::value::Tensor::from_array(preprocess(frame, INPUT_SIZE))?;
        let outputs = self.session.run(ort::inputs![input])?;

        // outputs[0]: regressors [1, 896, 16], outputs[1]: scores [1, 896, 1]
        if outputs.len() < 2 {
            return Err(format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into());
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("regressor tensor is not contiguous")?;
        let score_data = scores.as_slice().ok_or("score tensor is not contiguous")?;

        let mut candidates = decode(
            reg_data,
            score_data,
            &self.anchors,
            self.confidence,
            frame.width(),
            frame.height(),
        );
        let kept = nms(&mut candidates, NMS_IOU_THRESH);
        log::trace!("frame {}: {} face(s)", frame.index(), kept.len());
        Ok(kept)
    }
}

/// Nearest-neighbour resize to `size x size`, normalized to [0,1], NCHW.
fn preprocess(frame: &Frame, size: u32) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));
    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }
    tensor
}

/// Anchor centers in normalized [0,1] coordinates.
fn generate_anchors() -> Vec<[f32; 2]> {
    let layers = [(8usize, 2usize), (16, 6)]; // (stride, anchors per cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, per_cell) in layers {
        let grid = INPUT_SIZE as usize / stride;
        for y in 0..grid {
            for x in 0..grid {
                let center = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

/// Turns raw model output into frame-space detections above `confidence`.
fn decode(
    reg_data: &[f32],
    score_data: &[f32],
    anchors: &[[f32; 2]],
    confidence: f32,
    frame_w: u32,
    frame_h: u32,
) -> Vec<Detection> {
    let fw = frame_w as f32;
    let fh = frame_h as f32;
    let scale = INPUT_SIZE as f32;

    score_data
        .iter()
        .zip(anchors)
        .enumerate()
        .filter_map(|(i, (&raw, anchor))| {
            let score = sigmoid(raw);
            if score < confidence {
                return None;
            }
            let reg = reg_data.get(i * REGRESSOR_STRIDE..i * REGRESSOR_STRIDE + 4)?;
            let cx = anchor[0] + reg[0] / scale;
            let cy = anchor[1] + reg[1] / scale;
            let w = reg[2] / scale;
            let h = reg[3] / scale;

            let rect = FaceRect::from_corners(
                (cx - w / 2.0) * fw,
                (cy - h / 2.0) * fh,
                (cx + w / 2.0) * fw,
                (cy + h / 2.0) * fh,
            )
            .clamp_to(frame_w, frame_h);

            (!rect.is_empty()).then(|| Detection::new(rect, score))
        })
        .collect()
}

fn nms(dets: &mut [Detection], iou_thresh: f32) -> Vec<Detection> {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in dets.iter() {
        if keep.iter().all(|k| k.rect.iou(&det.rect) <= iou_thresh) {
            keep.push(*det);
        }
    }
    keep
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
