use ndarray::{ArrayView3, ArrayViewMut3};

/// One captured camera image: contiguous RGB bytes in row-major order.
///
/// Pixel-format conversion happens inside camera sources; everything past
/// the capture boundary sees 3-channel RGB8.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: usize,
}

pub const RGB_CHANNELS: usize = 3;

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * RGB_CHANNELS,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            index,
        }
    }

    /// Builds a frame from an `image` buffer, taking ownership of its pixels.
    pub fn from_rgb_image(image: image::RgbImage, index: usize) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, index)
    }

    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sequence number assigned by the camera source.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        let shape = self.shape();
        ArrayViewMut3::from_shape(shape, &mut self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, RGB_CHANNELS)
    }
}
