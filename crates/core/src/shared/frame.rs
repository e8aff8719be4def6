use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use ndarray::ArrayView3;

use crate::shared::region::Region;

/// A decoded camera frame: contiguous pixel bytes in row-major order.
///
/// Three-channel frames are RGB; single-channel frames are luma. `index`
/// is the sequence number assigned by the source, starting at zero.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn from_rgb_image(img: RgbImage, index: usize) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .expect("Frame data length must match dimensions")
    }

    /// Mutable RGB view for in-place drawing. `None` for non-RGB frames.
    pub fn as_rgb_canvas(&mut self) -> Option<ImageBuffer<Rgb<u8>, &mut [u8]>> {
        if self.channels != 3 {
            return None;
        }
        ImageBuffer::from_raw(self.width, self.height, self.data.as_mut_slice())
    }

    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.channels != 3 {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// ITU-R BT.601 luma conversion. Single-channel frames are cloned.
    pub fn to_grayscale(&self) -> Frame {
        if self.channels == 1 {
            return self.clone();
        }
        let step = self.channels as usize;
        let luma = self
            .data
            .chunks_exact(step)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Frame::new(luma, self.width, self.height, 1, self.index)
    }

    pub fn to_gray_image(&self) -> Option<GrayImage> {
        let gray = self.to_grayscale();
        GrayImage::from_raw(gray.width, gray.height, gray.data)
    }

    /// Copies the part of `region` that lies inside the frame.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn crop(&self, region: &Region) -> Option<Frame> {
        let r = region.clamped(self.width, self.height)?;
        let step = self.channels as usize;
        let row_len = r.width as usize * step;
        let mut out = Vec::with_capacity(row_len * r.height as usize);
        for y in r.y as usize..(r.y + r.height) as usize {
            let start = (y * self.width as usize + r.x as usize) * step;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        Some(Frame::new(
            out,
            r.width as u32,
            r.height as u32,
            self.channels,
            self.index,
        ))
    }

    /// Resizes an RGB frame to exactly `width` x `height`.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if (width, height) == self.size() {
            return self.clone();
        }
        match self.to_rgb_image() {
            Some(img) => {
                let out = image::imageops::resize(
                    &img,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
                Frame::from_rgb_image(out, self.index)
            }
            None => match self.to_gray_image() {
                Some(gray) => {
                    let out = image::imageops::resize(
                        &gray,
                        width,
                        height,
                        image::imageops::FilterType::Triangle,
                    );
                    Frame::new(out.into_raw(), width, height, 1, self.index)
                }
                None => self.clone(),
            },
        }
    }

    /// Scales to fit inside `max_width` x `max_height`, keeping aspect ratio.
    pub fn fit_within(&self, max_width: u32, max_height: u32) -> Frame {
        if self.width == 0 || self.height == 0 || max_width == 0 || max_height == 0 {
            return self.clone();
        }
        let scale = (max_width as f64 / self.width as f64).min(max_height as f64 / self.height as f64);
        let w = ((self.width as f64 * scale).round() as u32).max(1);
        let h = ((self.height as f64 * scale).round() as u32).max(1);
        self.resized(w, h)
    }
}
