/// Bounding box of a detected face in frame pixel coordinates.
///
/// Origin is the top-left corner of the frame. Width and height are clamped
/// to zero on construction, so a `FaceRect` never has negative extent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FaceRect {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl FaceRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: non_negative(width),
            height: non_negative(height),
        }
    }

    /// Builds a rect from corner coordinates. Swapped corners produce an
    /// empty rect rather than a negative one.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersects the rect with `[0, frame_w] x [0, frame_h]`.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Self {
        let fw = frame_w as f32;
        let fh = frame_h as f32;
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);
        Self::from_corners(x1, y1, x2, y2)
    }

    /// Offset of the rect center from the frame center, normalized so the
    /// frame edges map to -1.0 and 1.0.
    pub fn center_offset(&self, frame_w: u32, frame_h: u32) -> (f32, f32) {
        let (cx, cy) = self.center();
        (normalized_offset(cx, frame_w), normalized_offset(cy, frame_h))
    }

    pub fn iou(&self, other: &FaceRect) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

fn non_negative(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.max(0.0)
    }
}

fn normalized_offset(center: f32, extent: u32) -> f32 {
    if extent == 0 {
        return 0.0;
    }
    let half = extent as f32 / 2.0;
    ((center - half) / half).clamp(-1.0, 1.0)
}
